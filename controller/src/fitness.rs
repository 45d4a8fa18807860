//! Per-frame fitness functions.
//!
//! Every function reads two columns per region of interest from one
//! frame-metric row: column `2*roi` is the pixel count differing from
//! the background image (subject presence), column `2*roi + 1` is the
//! pixel count differing from an earlier frame (movement). Functions
//! differ in whether they look at the active region alone or active
//! minus passive, and in their output unit (frames, pixels, or a
//! ratio). All of them are stateless and shared read-only.

use crate::config::ConfigError;

/// Pixel-count thresholds shared by every fitness function.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Minimum background-diff pixel count for "subjects are present".
    pub background: f64,
    /// Maximum previous-diff pixel count for "no movement".
    pub previous: f64,
}

/// One pluggable per-frame metric. Implementations declare their
/// minimum region count and per-frame value range up front so the
/// pipeline can validate the arena and scale variance-weighted
/// reductions before any trial runs.
pub trait FitnessFunction: Send + Sync {
    fn code(&self) -> &'static str;
    fn min_rois(&self) -> usize;
    /// Inclusive bounds of `compute` for a single frame.
    fn frame_value_range(&self) -> (f64, f64);
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64;
}

fn background(row: &[f64], roi: usize) -> f64 {
    row[roi * 2]
}

fn previous(row: &[f64], roi: usize) -> f64 {
    row[roi * 2 + 1]
}

// An undefined movement value (the first frames of a video have no
// earlier frame to diff against) can never count as still.
fn still(thresholds: &Thresholds, row: &[f64], roi: usize) -> bool {
    let movement = previous(row, roi);
    movement >= 0.0 && movement < thresholds.previous
}

fn occupied(thresholds: &Thresholds, row: &[f64], roi: usize) -> bool {
    background(row, roi) > thresholds.background
}

/// Frames with no movement in the active region.
pub struct StillFramesActive;

impl FitnessFunction for StillFramesActive {
    fn code(&self) -> &'static str {
        "F_m_a"
    }
    fn min_rois(&self) -> usize {
        1
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        if still(thresholds, row, active_roi) {
            1.0
        } else {
            0.0
        }
    }
}

/// Still frames in the active region minus still frames in the passive
/// region.
pub struct StillFramesActiveMinusPassive;

impl FitnessFunction for StillFramesActiveMinusPassive {
    fn code(&self) -> &'static str {
        "F_m_ap"
    }
    fn min_rois(&self) -> usize {
        2
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        let passive_roi = 1 - active_roi;
        let mut value = 0.0;
        if still(thresholds, row, active_roi) {
            value += 1.0;
        }
        if still(thresholds, row, passive_roi) {
            value -= 1.0;
        }
        value
    }
}

/// Like [`StillFramesActiveMinusPassive`] but a region only counts
/// when subjects are present in it.
pub struct OccupiedStillFramesActiveMinusPassive;

impl FitnessFunction for OccupiedStillFramesActiveMinusPassive {
    fn code(&self) -> &'static str {
        "F_bm_ap"
    }
    fn min_rois(&self) -> usize {
        2
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        let passive_roi = 1 - active_roi;
        let mut value = 0.0;
        if occupied(thresholds, row, active_roi) && still(thresholds, row, active_roi) {
            value += 1.0;
        }
        if occupied(thresholds, row, passive_roi) && still(thresholds, row, passive_roi) {
            value -= 1.0;
        }
        value
    }
}

/// Presence pixels in the active region on frames where subjects are
/// present and still.
pub struct StillPixelsActive;

impl FitnessFunction for StillPixelsActive {
    fn code(&self) -> &'static str {
        "B_bm_a"
    }
    fn min_rois(&self) -> usize {
        1
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        if occupied(thresholds, row, active_roi) && still(thresholds, row, active_roi) {
            background(row, active_roi)
        } else {
            0.0
        }
    }
}

/// Presence pixels in the active region minus presence pixels in the
/// passive region, each gated on presence and stillness.
pub struct StillPixelsActiveMinusPassive;

impl FitnessFunction for StillPixelsActiveMinusPassive {
    fn code(&self) -> &'static str {
        "B_bm_ap"
    }
    fn min_rois(&self) -> usize {
        2
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        let passive_roi = 1 - active_roi;
        let mut value = 0.0;
        if occupied(thresholds, row, active_roi) && still(thresholds, row, active_roi) {
            value += background(row, active_roi);
        }
        if occupied(thresholds, row, passive_roi) && still(thresholds, row, passive_roi) {
            value -= background(row, passive_roi);
        }
        value
    }
}

/// Ratio of moving pixels to presence pixels in the active region.
pub struct MovingPixelRatioActive;

impl FitnessFunction for MovingPixelRatioActive {
    fn code(&self) -> &'static str {
        "%B_m_a"
    }
    fn min_rois(&self) -> usize {
        1
    }
    fn frame_value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }
    fn compute(&self, thresholds: &Thresholds, active_roi: usize, row: &[f64]) -> f64 {
        let movement = previous(row, active_roi);
        if movement >= 0.0 && occupied(thresholds, row, active_roi) {
            movement / background(row, active_roi)
        } else {
            0.0
        }
    }
}

pub const FUNCTIONS: &[&dyn FitnessFunction] = &[
    &StillFramesActive,
    &StillFramesActiveMinusPassive,
    &OccupiedStillFramesActiveMinusPassive,
    &StillPixelsActive,
    &StillPixelsActiveMinusPassive,
    &MovingPixelRatioActive,
];

/// Look a function up by its code. Resolved once at startup; an
/// unknown code is a configuration error, never a mid-run surprise.
pub fn resolve(code: &str) -> Result<&'static dyn FitnessFunction, ConfigError> {
    FUNCTIONS
        .iter()
        .copied()
        .find(|f| f.code() == code)
        .ok_or_else(|| ConfigError::UnknownFitnessFunction(code.to_string()))
}

/// Width of a function's per-frame value range, used to scale the
/// variance-weighted reduction policies.
pub fn frame_span(function: &dyn FitnessFunction) -> f64 {
    let (min, max) = function.frame_value_range();
    max - min
}
