//! Controller library: everything between the optimizer's fitness
//! callback and the unit fleet.
//!
//! ```text
//!  optimizer ──► Evaluator ──► Episode::select_arena ──► Arena
//!                   │                                      │
//!                   │            frame capture ◄── camera  │ run commands
//!                   ▼                   │                  ▼
//!              reduction ◄── scoring ◄──┘              unit daemons
//! ```

pub mod arena;
pub mod capture;
pub mod config;
pub mod episode;
pub mod error;
pub mod evaluator;
pub mod fitness;
pub mod logs;
pub mod reduce;

pub use config::{Config, ConfigError};
pub use error::RunError;
pub use evaluator::{Evaluator, HardwareTrialRunner, Trial, TrialRunner};
