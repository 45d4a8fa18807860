//! Per-connection command session.
//!
//! The session owns the state machine the protocol promises:
//! `Uninitialised → Ready → Executing → Ready → … → Terminated`.
//! Commands arriving in the wrong state are answered with `Rejected`
//! and logged; the unit never crashes on a bad request and never
//! executes one.

use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;

use evostim_protocol::actuator::standby_all;
use evostim_protocol::types::UnitId;
use evostim_protocol::{Actuator, StimulusModel, Timeline, UnitReply, UnitRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialised,
    Ready,
    Executing,
    Terminated,
}

/// Run context installed by `Initialise` and consulted by every
/// subsequent replay command.
struct RunContext {
    frames_per_second: u32,
    timeline: Timeline,
    has_blip: bool,
    stimulus_model: StimulusModel,
}

/// What the connection loop should do after a reply is sent.
pub enum Outcome {
    Continue(UnitReply),
    Shutdown(UnitReply),
}

pub struct Session<A: Actuator> {
    unit_id: UnitId,
    device: A,
    temperature_target: f64,
    state: SessionState,
    context: Option<RunContext>,
}

impl<A: Actuator> Session<A> {
    pub fn new(unit_id: UnitId, device: A, temperature_target: f64) -> Self {
        Self { unit_id, device, temperature_target, state: SessionState::Uninitialised, context: None }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn into_device(self) -> A {
        self.device
    }

    /// Reset to a fresh session for a new controller connection. The
    /// device keeps whatever baseline the last session left it in.
    pub fn reset(&mut self) {
        if self.state != SessionState::Terminated {
            self.state = SessionState::Uninitialised;
            self.context = None;
        }
    }

    /// Quiesce every actuator and release the device. Used by
    /// `Terminate` and by fatal-signal handling; `casu.stop()` does
    /// not switch the airflow off, so that is issued first.
    pub async fn quiesce(&mut self) {
        self.device.airflow_standby().await;
        self.device.stop().await;
        self.state = SessionState::Terminated;
    }

    pub async fn handle(&mut self, request: UnitRequest) -> Outcome {
        if self.state == SessionState::Terminated {
            return Outcome::Shutdown(self.reject("unit is terminated"));
        }
        match request {
            UnitRequest::Initialise { frames_per_second, segments, has_blip, stimulus_model } => {
                let timeline = match Timeline::from_specs(&segments) {
                    Ok(t) => t,
                    Err(e) => return Outcome::Continue(self.reject(&e.to_string())),
                };
                tracing::info!(
                    unit_id = self.unit_id,
                    frames_per_second,
                    has_blip,
                    model = stimulus_model.name(),
                    segments = timeline.segments().len(),
                    "Initialising session"
                );
                self.context =
                    Some(RunContext { frames_per_second, timeline, has_blip, stimulus_model });
                standby_all(&mut self.device, self.temperature_target).await;
                self.state = SessionState::Ready;
                Outcome::Continue(UnitReply::Done)
            }
            UnitRequest::RunActive { parameters } => match self.run(Some(parameters)).await {
                Ok(reply) => Outcome::Continue(reply),
                Err(reason) => Outcome::Continue(self.reject(&reason)),
            },
            UnitRequest::RunPassive => match self.run(None).await {
                Ok(reply) => Outcome::Continue(reply),
                Err(reason) => Outcome::Continue(self.reject(&reason)),
            },
            UnitRequest::ReadStatus => {
                let temperature = self.device.read_temperature().await;
                tracing::debug!(unit_id = self.unit_id, temperature, "Status read");
                Outcome::Continue(UnitReply::Reading { temperature })
            }
            UnitRequest::Standby => {
                tracing::info!(unit_id = self.unit_id, "Standby");
                standby_all(&mut self.device, self.temperature_target).await;
                Outcome::Continue(UnitReply::Done)
            }
            UnitRequest::SpreadSubjects { duration } => {
                if self.state != SessionState::Ready {
                    return Outcome::Continue(self.reject("SpreadSubjects requires Initialise"));
                }
                tracing::info!(unit_id = self.unit_id, duration, "Spreading subjects");
                self.device.set_temperature_target(self.temperature_target).await;
                self.device.set_airflow(1.0).await;
                sleep(Duration::from_secs_f64(duration.max(0.0))).await;
                self.device.airflow_standby().await;
                Outcome::Continue(UnitReply::Done)
            }
            UnitRequest::Terminate => {
                tracing::info!(unit_id = self.unit_id, "Terminating");
                self.quiesce().await;
                Outcome::Shutdown(UnitReply::Done)
            }
        }
    }

    async fn run(&mut self, parameters: Option<Vec<f64>>) -> Result<UnitReply, String> {
        if self.state != SessionState::Ready {
            return Err("run commands require Initialise".into());
        }
        let active = parameters.is_some();
        let Some(context) = self.context.as_ref() else {
            return Err("run commands require Initialise".into());
        };
        if let Some(ref p) = parameters {
            context.stimulus_model.check(p).map_err(|e| e.to_string())?;
        }
        tracing::info!(unit_id = self.unit_id, active, "Replaying timeline");
        self.state = SessionState::Executing;
        let started_at = Utc::now();
        context
            .timeline
            .execute(
                &mut self.device,
                parameters.as_deref().map(|p| (context.stimulus_model, p)),
                context.has_blip,
                context.frames_per_second,
            )
            .await;
        self.state = SessionState::Ready;
        tracing::info!(unit_id = self.unit_id, active, "Replay finished");
        if active {
            Ok(UnitReply::Started { started_at })
        } else {
            Ok(UnitReply::Done)
        }
    }

    fn reject(&self, reason: &str) -> UnitReply {
        tracing::warn!(unit_id = self.unit_id, state = ?self.state, reason, "Rejected request");
        UnitReply::Rejected { reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimCasu;
    use evostim_protocol::{SegmentKind, SegmentSpec};

    fn short_timeline() -> Vec<SegmentSpec> {
        vec![SegmentSpec {
            duration: 0.2,
            kind: SegmentKind::Vibration,
            unit_index: 0,
            description: None,
        }]
    }

    fn initialise() -> UnitRequest {
        UnitRequest::Initialise {
            frames_per_second: 10,
            segments: short_timeline(),
            has_blip: false,
            stimulus_model: StimulusModel::SinglePulseFrequencyPause,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_before_initialise_is_rejected() {
        let mut session = Session::new(1, SimCasu::new(28.0), 28.0);
        let outcome = session.handle(UnitRequest::RunActive { parameters: vec![440.0, 100.0] }).await;
        match outcome {
            Outcome::Continue(UnitReply::Rejected { .. }) => {}
            _ => panic!("expected rejection"),
        }
        assert_eq!(session.state(), SessionState::Uninitialised);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_returns_to_ready() {
        let mut session = Session::new(1, SimCasu::new(28.0), 28.0);
        assert!(matches!(session.handle(initialise()).await, Outcome::Continue(UnitReply::Done)));
        assert_eq!(session.state(), SessionState::Ready);

        let outcome = session.handle(UnitRequest::RunActive { parameters: vec![440.0, 100.0] }).await;
        assert!(matches!(outcome, Outcome::Continue(UnitReply::Started { .. })));
        assert_eq!(session.state(), SessionState::Ready);

        let outcome = session.handle(UnitRequest::RunPassive).await;
        assert!(matches!(outcome, Outcome::Continue(UnitReply::Done)));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_parameter_count_is_rejected_without_state_change() {
        let mut session = Session::new(1, SimCasu::new(28.0), 28.0);
        session.handle(initialise()).await;
        let outcome = session.handle(UnitRequest::RunActive { parameters: vec![440.0] }).await;
        assert!(matches!(outcome, Outcome::Continue(UnitReply::Rejected { .. })));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn status_and_standby_work_in_any_live_state() {
        let mut session = Session::new(1, SimCasu::new(27.5), 28.0);
        // before initialise
        let outcome = session.handle(UnitRequest::ReadStatus).await;
        match outcome {
            Outcome::Continue(UnitReply::Reading { temperature }) => assert_eq!(temperature, 27.5),
            _ => panic!("expected reading"),
        }
        assert!(matches!(
            session.handle(UnitRequest::Standby).await,
            Outcome::Continue(UnitReply::Done)
        ));
        assert_eq!(session.state(), SessionState::Uninitialised);
    }

    #[tokio::test(start_paused = true)]
    async fn spread_subjects_blows_airflow_only_when_ready() {
        let mut session = Session::new(1, SimCasu::new(28.0), 28.0);
        let spread = UnitRequest::SpreadSubjects { duration: 2.0 };
        let outcome = session.handle(spread.clone()).await;
        assert!(matches!(outcome, Outcome::Continue(UnitReply::Rejected { .. })));

        session.handle(initialise()).await;
        let outcome = session.handle(spread).await;
        assert!(matches!(outcome, Outcome::Continue(UnitReply::Done)));
        assert_eq!(session.state(), SessionState::Ready);
        use crate::device::Action;
        let device = session.into_device();
        let on = device.actions.iter().position(|a| *a == Action::Airflow(1.0)).unwrap();
        let off = device.actions.iter().rposition(|a| *a == Action::AirflowStandby).unwrap();
        assert!(on < off);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_quiesces_and_shuts_down() {
        let mut session = Session::new(1, SimCasu::new(28.0), 28.0);
        session.handle(initialise()).await;
        let outcome = session.handle(UnitRequest::Terminate).await;
        assert!(matches!(outcome, Outcome::Shutdown(UnitReply::Done)));
        assert_eq!(session.state(), SessionState::Terminated);
        let device = session.into_device();
        use crate::device::Action;
        let stop_pos = device.actions.iter().position(|a| *a == Action::Stop).unwrap();
        let airflow_pos =
            device.actions.iter().rposition(|a| *a == Action::AirflowStandby).unwrap();
        assert!(airflow_pos < stop_pos);
    }
}
