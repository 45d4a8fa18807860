//! Simulated CASU device.
//!
//! Real hardware sits behind a vendor runtime the daemon does not link
//! against; `SimCasu` stands in behind the same [`Actuator`] seam,
//! logging every actuation and serving a configurable temperature
//! reading. It also keeps an action trace, which is what the tests
//! assert against.

use evostim_protocol::Actuator;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    TemperatureTarget(f64),
    VibrationPattern { periods_ms: Vec<u32>, frequencies_hz: Vec<u32>, amplitudes: Vec<u32> },
    SpeakerStandby,
    Airflow(f64),
    AirflowStandby,
    Led(f64, f64, f64),
    LedStandby,
    IrStandby,
    Stop,
}

pub struct SimCasu {
    temperature: f64,
    pub actions: Vec<Action>,
}

impl SimCasu {
    pub fn new(temperature: f64) -> Self {
        Self { temperature, actions: Vec::new() }
    }

    pub fn set_temperature_reading(&mut self, celsius: f64) {
        self.temperature = celsius;
    }
}

impl Actuator for SimCasu {
    async fn set_temperature_target(&mut self, celsius: f64) {
        tracing::debug!(celsius, "sim: temperature target");
        self.actions.push(Action::TemperatureTarget(celsius));
    }

    async fn read_temperature(&mut self) -> f64 {
        self.temperature
    }

    async fn set_vibration_pattern(
        &mut self,
        periods_ms: Vec<u32>,
        frequencies_hz: Vec<u32>,
        amplitudes: Vec<u32>,
    ) {
        tracing::debug!(?periods_ms, ?frequencies_hz, ?amplitudes, "sim: vibration pattern");
        self.actions.push(Action::VibrationPattern { periods_ms, frequencies_hz, amplitudes });
    }

    async fn speaker_standby(&mut self) {
        self.actions.push(Action::SpeakerStandby);
    }

    async fn set_airflow(&mut self, intensity: f64) {
        tracing::debug!(intensity, "sim: airflow");
        self.actions.push(Action::Airflow(intensity));
    }

    async fn airflow_standby(&mut self) {
        self.actions.push(Action::AirflowStandby);
    }

    async fn set_led(&mut self, r: f64, g: f64, b: f64) {
        self.actions.push(Action::Led(r, g, b));
    }

    async fn led_standby(&mut self) {
        self.actions.push(Action::LedStandby);
    }

    async fn ir_standby(&mut self) {
        self.actions.push(Action::IrStandby);
    }

    async fn stop(&mut self) {
        tracing::info!("sim: device stopped");
        self.actions.push(Action::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evostim_protocol::{SegmentKind, SegmentSpec, StimulusModel, Timeline};

    fn spec(duration: f64, kind: SegmentKind) -> SegmentSpec {
        SegmentSpec { duration, kind, unit_index: -1, description: None }
    }

    #[tokio::test(start_paused = true)]
    async fn active_replay_drives_speaker_then_standby() {
        let timeline = Timeline::from_specs(&[
            spec(0.5, SegmentKind::NoStimuli),
            spec(1.0, SegmentKind::Vibration),
            spec(0.5, SegmentKind::Airflow),
        ])
        .unwrap();
        let mut casu = SimCasu::new(28.0);
        let params = [440.0, 100.0];
        timeline
            .execute(&mut casu, Some((StimulusModel::SinglePulseFrequencyPause, &params)), false, 4)
            .await;

        assert_eq!(
            casu.actions,
            vec![
                Action::VibrationPattern {
                    periods_ms: vec![900, 100],
                    frequencies_hz: vec![440, 1],
                    amplitudes: vec![50, 0],
                },
                Action::SpeakerStandby,
                Action::Airflow(1.0),
                Action::AirflowStandby,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn passive_replay_keeps_the_speaker_silent() {
        let timeline = Timeline::from_specs(&[
            spec(1.0, SegmentKind::Vibration),
            spec(0.5, SegmentKind::Airflow),
        ])
        .unwrap();
        let mut casu = SimCasu::new(28.0);
        timeline.execute(&mut casu, None, true, 4).await;

        // blip before the first segment and after each of the two
        let leds = casu.actions.iter().filter(|a| matches!(a, Action::Led(..))).count();
        assert_eq!(leds, 3);
        assert!(!casu.actions.iter().any(|a| matches!(a, Action::VibrationPattern { .. })));
        assert!(casu.actions.contains(&Action::Airflow(1.0)));
    }
}
