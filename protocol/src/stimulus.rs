//! Vibration stimulus models.
//!
//! A model maps a candidate parameter vector onto a speaker pattern.
//! Models are fixed variants rather than a string-keyed table so an
//! unknown model is unrepresentable once a run has started.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actuator::Actuator;

/// Parameter domains shared by all pulse models. The controller
/// validates candidate vectors against these before dispatch.
pub mod domain {
    pub const MIN_FREQUENCY_HZ: u32 = 300;
    pub const MAX_FREQUENCY_HZ: u32 = 1500;
    pub const MIN_PERIOD_MS: u32 = 100;
    pub const MAX_PERIOD_MS: u32 = 1000;
    pub const MIN_AMPLITUDE: u32 = 5;
    pub const MAX_AMPLITUDE: u32 = 50;
}

/// One pulse cycle lasts one second; the pause gene carves it up.
const PULSE_PERIOD_MS: u32 = 1000;
const DEFAULT_AMPLITUDE: u32 = 50;

#[derive(Debug, Error)]
#[error("{model} expects {expected} parameters, got {got}")]
pub struct ParameterCountError {
    pub model: &'static str,
    pub expected: usize,
    pub got: usize,
}

/// The stimulus models a unit can replay during Vibration segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimulusModel {
    /// Genes: `[frequency_hz, pause_ms]`; amplitude fixed at 50.
    SinglePulseFrequencyPause,
    /// Genes: `[frequency_hz, pause_ms, amplitude]`.
    SinglePulseFrequencyPauseAmplitude,
}

impl StimulusModel {
    pub fn name(&self) -> &'static str {
        match self {
            StimulusModel::SinglePulseFrequencyPause => "SinglePulseFrequencyPause",
            StimulusModel::SinglePulseFrequencyPauseAmplitude => {
                "SinglePulseFrequencyPauseAmplitude"
            }
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            StimulusModel::SinglePulseFrequencyPause => 2,
            StimulusModel::SinglePulseFrequencyPauseAmplitude => 3,
        }
    }

    pub fn check(&self, parameters: &[f64]) -> Result<(), ParameterCountError> {
        if parameters.len() != self.parameter_count() {
            return Err(ParameterCountError {
                model: self.name(),
                expected: self.parameter_count(),
                got: parameters.len(),
            });
        }
        Ok(())
    }

    /// Program the speaker with the pattern this parameter vector
    /// encodes. The pattern keeps repeating until `speaker_standby`.
    pub async fn apply<A: Actuator>(&self, parameters: &[f64], actuator: &mut A) {
        let frequency = parameters[0].round() as u32;
        let pause = (parameters[1].round() as u32).min(PULSE_PERIOD_MS);
        let vibration = PULSE_PERIOD_MS - pause;
        let amplitude = match self {
            StimulusModel::SinglePulseFrequencyPause => DEFAULT_AMPLITUDE,
            StimulusModel::SinglePulseFrequencyPauseAmplitude => parameters[2].round() as u32,
        };
        tracing::debug!(frequency, vibration, pause, amplitude, "Applying stimulus pattern");
        actuator
            .set_vibration_pattern(
                vec![vibration, pause],
                vec![frequency, 1],
                vec![amplitude, 0],
            )
            .await;
    }
}
