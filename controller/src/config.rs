//! Run configuration and its startup validation.
//!
//! Everything that could fail a run is checked here, before any unit
//! is touched: an invalid reduction/repeat combination or an unknown
//! fitness function must never surface mid-run, after subjects are
//! already staged.

use thiserror::Error;

use evostim_protocol::channel::CommandTimeouts;
use evostim_protocol::{StimulusModel, Timeline};

use crate::fitness::{self, FitnessFunction, Thresholds};
use crate::reduce::ReductionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown fitness function code {0:?}")]
    UnknownFitnessFunction(String),
    #[error("trimmed-mean reduction needs at least 3 repeats, got {repeats}")]
    NotEnoughRepeats { repeats: usize },
    #[error("fitness function {code} needs {required} regions of interest, the arena has {available}")]
    NotEnoughRois { code: &'static str, required: usize, available: usize },
    #[error("repeats must be at least 1")]
    NoRepeats,
}

/// Validated settings for one run. Built once in `main`, shared
/// read-only by the pipeline.
pub struct Config {
    pub frames_per_second: u32,
    pub has_blip: bool,
    /// Fitness evaluations per candidate.
    pub repeats: usize,
    /// Evaluations before the subject group is swapped.
    pub evaluations_per_episode: u32,
    pub reduction: ReductionPolicy,
    pub fitness: &'static dyn FitnessFunction,
    pub thresholds: Thresholds,
    /// Seconds between the frames compared for movement.
    pub movement_interval: u32,
    /// Airflow burst before each trial, in seconds, dispersing the
    /// subjects away from the units; `None` skips the burst.
    pub spread_duration: Option<f64>,
    pub stimulus_model: StimulusModel,
    /// Peltier reference temperature in °C.
    pub target_temperature: f64,
    /// Half-width of the acceptable band around the target.
    pub temperature_tolerance: f64,
    /// Largest acceptable reading difference between units of one arena.
    pub max_temperature_spread: f64,
    pub timeouts: CommandTimeouts,
}

impl Config {
    /// Startup validation against the arena the run will use.
    pub fn validate(&self, rois_available: usize) -> Result<(), ConfigError> {
        if self.repeats == 0 {
            return Err(ConfigError::NoRepeats);
        }
        self.reduction.validate(self.repeats)?;
        if rois_available < self.fitness.min_rois() {
            return Err(ConfigError::NotEnoughRois {
                code: self.fitness.code(),
                required: self.fitness.min_rois(),
                available: rois_available,
            });
        }
        Ok(())
    }

    /// Frame distance between a frame and the earlier frame it is
    /// compared against for movement. Rows closer to the start of the
    /// video than this have no movement value.
    pub fn delta_frames(&self) -> usize {
        (self.frames_per_second / self.movement_interval.max(1)) as usize
    }

    /// Width of the achievable trial-score interval: the per-frame
    /// span of the fitness function times the number of scored
    /// (vibration) frames. Scales the variance-weighted reductions.
    pub fn score_range(&self, timeline: &Timeline) -> f64 {
        let scored_frames = timeline.vibration_frames().count();
        fitness::frame_span(self.fitness) * scored_frames as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evostim_protocol::{SegmentKind, SegmentSpec};

    fn config(repeats: usize, reduction: ReductionPolicy, code: &str) -> Config {
        Config {
            frames_per_second: 4,
            has_blip: true,
            repeats,
            evaluations_per_episode: 10,
            reduction,
            fitness: fitness::resolve(code).unwrap(),
            thresholds: Thresholds { background: 100.0, previous: 50.0 },
            movement_interval: 1,
            spread_duration: None,
            stimulus_model: StimulusModel::SinglePulseFrequencyPause,
            target_temperature: 28.0,
            temperature_tolerance: 1.0,
            max_temperature_spread: 1.0,
            timeouts: CommandTimeouts::default(),
        }
    }

    #[test]
    fn trimmed_mean_with_two_repeats_fails_at_startup() {
        let cfg = config(2, ReductionPolicy::AverageWithoutBestWorst, "F_m_a");
        assert!(matches!(cfg.validate(1), Err(ConfigError::NotEnoughRepeats { repeats: 2 })));
    }

    #[test]
    fn two_region_function_rejects_single_unit_arena() {
        let cfg = config(3, ReductionPolicy::Average, "F_m_ap");
        assert!(matches!(cfg.validate(1), Err(ConfigError::NotEnoughRois { .. })));
        assert!(cfg.validate(2).is_ok());
    }

    #[test]
    fn score_range_scales_with_vibration_frames() {
        let cfg = config(3, ReductionPolicy::Average, "F_m_ap");
        let mut timeline = Timeline::from_specs(&[
            SegmentSpec {
                duration: 30.0,
                kind: SegmentKind::NoStimuli,
                unit_index: -1,
                description: None,
            },
            SegmentSpec {
                duration: 60.0,
                kind: SegmentKind::Vibration,
                unit_index: -1,
                description: None,
            },
        ])
        .unwrap();
        timeline.compute_first_last_frames(4, false).unwrap();
        // span 2 (−1..1) times 240 vibration frames.
        assert_eq!(cfg.score_range(&timeline), 480.0);
    }
}
