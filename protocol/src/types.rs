use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::segments::SegmentSpec;
use crate::stimulus::StimulusModel;

/// Unique unit identifier, assigned by the operator at deployment time.
pub type UnitId = u32;

/// A command sent from the controller to a unit daemon.
///
/// The protocol is strictly synchronous request/reply: every request
/// is answered by exactly one [`UnitReply`] before the next request
/// may be sent on the same channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum UnitRequest {
    /// Install the session context for the following runs. Required
    /// before any `RunActive`/`RunPassive`/`SpreadSubjects`.
    Initialise {
        frames_per_second: u32,
        segments: Vec<SegmentSpec>,
        has_blip: bool,
        stimulus_model: StimulusModel,
    },
    /// Replay the timeline with the stimulus model driven by the given
    /// parameter vector.
    RunActive { parameters: Vec<f64> },
    /// Replay the timeline without stimulus (blips and airflow still
    /// happen, the speaker stays silent).
    RunPassive,
    /// Read the wax temperature sensor. Valid in any non-terminated
    /// state, does not change state.
    ReadStatus,
    /// Return every actuator to its baseline. Valid in any
    /// non-terminated state, does not change state.
    Standby,
    /// Run airflow for `duration` seconds to disperse the subjects.
    SpreadSubjects { duration: f64 },
    /// Quiesce all actuators and shut the daemon down. Always
    /// succeeds; afterwards the channel reports `ConnectionClosed`.
    Terminate,
}

impl UnitRequest {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            UnitRequest::Initialise { .. } => "Initialise",
            UnitRequest::RunActive { .. } => "RunActive",
            UnitRequest::RunPassive => "RunPassive",
            UnitRequest::ReadStatus => "ReadStatus",
            UnitRequest::Standby => "Standby",
            UnitRequest::SpreadSubjects { .. } => "SpreadSubjects",
            UnitRequest::Terminate => "Terminate",
        }
    }
}

/// A reply sent from a unit daemon back to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum UnitReply {
    /// The command completed.
    Done,
    /// `RunActive` completed; `started_at` is the wall-clock instant
    /// stimulus playback began, for correlation with captured video.
    Started { started_at: DateTime<Utc> },
    /// Raw sensor value answering `ReadStatus`.
    Reading { temperature: f64 },
    /// The command was invalid in the unit's current state. The unit
    /// keeps its prior state.
    Rejected { reason: String },
}
