//! Controller-side failure taxonomy.
//!
//! A trial on live subjects cannot be transparently retried, so none of
//! these are swallowed: unit and capture failures abort the current
//! trial and surface to the operator, arena health shortfalls pause
//! until the environment is corrected, and configuration problems are
//! raised before any trial runs. An aborted trial never turns into a
//! fitness value of zero.

use std::time::Duration;

use thiserror::Error;

use evostim_protocol::segments::TimelineError;
use evostim_protocol::types::UnitId;
use evostim_protocol::ChannelError;

#[derive(Debug, Error)]
pub enum RunError {
    /// A unit gave no reply within its command deadline. Fatal to the
    /// trial; the stimulus may already have been delivered, so it is
    /// never resent.
    #[error("unit {unit_id} gave no reply to {command} within {timeout:?}")]
    UnitUnreachable { unit_id: UnitId, command: &'static str, timeout: Duration },

    /// A unit refused a command as invalid for its current state.
    #[error("unit {unit_id} rejected {command}: {reason}")]
    ProtocolViolation { unit_id: UnitId, command: &'static str, reason: String },

    /// A unit answered with a reply shape the command does not have.
    #[error("unit {unit_id} answered {command} with an unexpected reply")]
    UnexpectedReply { unit_id: UnitId, command: &'static str },

    /// Total arena suitability is zero. Retryable after the operator
    /// corrects the environment, never fatal to the run.
    #[error("no arena is suitable for a trial")]
    AllArenasUnhealthy,

    /// Frame extraction came up short of the timeline. The trial is
    /// aborted and re-run, never padded with synthetic rows.
    #[error("capture produced {got} frames, the timeline needs {needed}")]
    CaptureFailure { needed: usize, got: usize },

    /// The timeline cannot be mapped onto frame ranges, e.g. a
    /// segment shorter than one frame at the configured rate.
    #[error("invalid timeline")]
    Timeline(#[from] TimelineError),

    #[error("channel to unit {unit_id} failed")]
    Channel {
        unit_id: UnitId,
        #[source]
        source: ChannelError,
    },

    #[error("i/o failure")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Fold a channel error on `unit_id` into the taxonomy: a missing
    /// reply is `UnitUnreachable`, anything else keeps its cause.
    pub fn from_channel(unit_id: UnitId, command: &'static str, err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout { timeout, .. } => {
                RunError::UnitUnreachable { unit_id, command, timeout }
            }
            source => RunError::Channel { unit_id, source },
        }
    }
}
