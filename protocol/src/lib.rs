//! evostim wire protocol and shared stimulus model.
//!
//! A controller process drives a small fleet of actuator/sensor units
//! (CASUs) through timed stimulus programs. Each unit runs a daemon
//! that owns the physical device; the controller talks to it over one
//! reliable point-to-point channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  request/reply  ┌────────┐
//!  │ controller │◄───────────────►│ unit 1 │──► CASU hardware
//!  │            │◄───────────────►│ unit 2 │──► CASU hardware
//!  └────────────┘   (1 channel    └────────┘
//!                    per unit)
//! ```
//!
//! ## Protocol
//! - Strictly synchronous: one in-flight request per unit, every
//!   request gets exactly one reply
//! - Frames are a u32 big-endian length prefix plus a JSON body
//! - The unit keeps a per-connection session state machine; commands
//!   sent in the wrong state are rejected, never executed
//!
//! ## Timelines
//! - A stimulus program is an ordered list of timed segments
//! - The same segment list maps wall-clock durations onto video frame
//!   ranges, so the controller can score the recording afterwards

pub mod actuator;
pub mod channel;
pub mod frame;
pub mod segments;
pub mod stimulus;
pub mod types;

pub use actuator::Actuator;
pub use channel::{ChannelError, UnitChannel};
pub use segments::{Segment, SegmentKind, SegmentSpec, Timeline};
pub use stimulus::StimulusModel;
pub use types::{UnitReply, UnitRequest};
