//! The stimulus segment timeline.
//!
//! A timeline has a dual role: it schedules what a unit does during a
//! trial, and it maps the same wall-clock schedule onto frame ranges
//! of the video recorded alongside, so each frame can later be
//! attributed to a segment when scoring.
//!
//! When the blip marker is enabled the unit pulses its LED immediately
//! before and after every segment; the frame arithmetic reserves one
//! leading frame plus two spacer frames between segments for those
//! pulses. This two-spacer rule is the authoritative contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use crate::actuator::Actuator;
use crate::stimulus::StimulusModel;

/// What a unit does during one timed phase of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    #[serde(rename = "vibration")]
    Vibration,
    #[serde(rename = "airflow")]
    Airflow,
    #[serde(rename = "no stimuli")]
    NoStimuli,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Vibration => "vibration",
            SegmentKind::Airflow => "airflow",
            SegmentKind::NoStimuli => "no stimuli",
        }
    }
}

/// One timeline record as authored in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Seconds, must be positive.
    pub duration: f64,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    /// Which unit the segment concerns, -1 when unset.
    #[serde(default = "unset_unit_index")]
    pub unit_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn unset_unit_index() -> i32 {
    -1
}

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("timeline has no segments")]
    Empty,
    #[error("segment {index} ({kind}) has non-positive duration {duration}")]
    BadDuration { index: usize, kind: &'static str, duration: f64 },
    #[error(
        "segment {index} ({kind}) lasts {duration} s, less than one frame at {frames_per_second} fps"
    )]
    TooShort { index: usize, kind: &'static str, duration: f64, frames_per_second: u32 },
}

/// A segment with its computed frame range.
///
/// `first_frame`/`last_frame` are inclusive indices into the trial
/// video, overwritten by [`Timeline::compute_first_last_frames`] on
/// every trial.
#[derive(Debug, Clone)]
pub struct Segment {
    pub duration: f64,
    pub kind: SegmentKind,
    pub unit_index: i32,
    pub description: Option<String>,
    pub first_frame: usize,
    pub last_frame: usize,
}

impl Segment {
    fn from_spec(spec: &SegmentSpec) -> Self {
        Self {
            duration: spec.duration,
            kind: spec.kind,
            unit_index: spec.unit_index,
            description: spec.description.clone(),
            first_frame: 0,
            last_frame: 0,
        }
    }

    /// Human-readable label, falling back to the kind name.
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(self.kind.as_str())
    }

    pub fn frame_count(&self, frames_per_second: u32) -> usize {
        (self.duration * frames_per_second as f64).round() as usize
    }

    pub fn contains_frame(&self, frame: usize) -> bool {
        self.first_frame <= frame && frame <= self.last_frame
    }
}

/// An ordered list of segments plus the frame bookkeeping derived
/// from it. Reused across episodes; not safe for concurrent trials
/// because frame ranges are overwritten per trial.
#[derive(Debug, Clone)]
pub struct Timeline {
    segments: Vec<Segment>,
}

impl Timeline {
    pub fn from_specs(specs: &[SegmentSpec]) -> Result<Self, TimelineError> {
        if specs.is_empty() {
            return Err(TimelineError::Empty);
        }
        for (index, spec) in specs.iter().enumerate() {
            if !(spec.duration > 0.0) {
                return Err(TimelineError::BadDuration {
                    index,
                    kind: spec.kind.as_str(),
                    duration: spec.duration,
                });
            }
        }
        Ok(Self { segments: specs.iter().map(Segment::from_spec).collect() })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn specs(&self) -> Vec<SegmentSpec> {
        self.segments
            .iter()
            .map(|s| SegmentSpec {
                duration: s.duration,
                kind: s.kind,
                unit_index: s.unit_index,
                description: s.description.clone(),
            })
            .collect()
    }

    /// Walk the segments assigning inclusive frame ranges. The cursor
    /// starts at 1 when blips are enabled (frame 0 is the leading
    /// pulse) and two spacer frames separate consecutive segments.
    /// A segment whose duration rounds to zero frames has no valid
    /// inclusive range and is refused.
    pub fn compute_first_last_frames(
        &mut self,
        frames_per_second: u32,
        has_blip: bool,
    ) -> Result<(), TimelineError> {
        let mut cursor: usize = if has_blip { 1 } else { 0 };
        for (index, segment) in self.segments.iter_mut().enumerate() {
            let frames = segment.frame_count(frames_per_second);
            if frames == 0 {
                return Err(TimelineError::TooShort {
                    index,
                    kind: segment.kind.as_str(),
                    duration: segment.duration,
                    frames_per_second,
                });
            }
            segment.first_frame = cursor;
            segment.last_frame = cursor + frames - 1;
            cursor = segment.last_frame + 1 + if has_blip { 2 } else { 0 };
        }
        Ok(())
    }

    /// Frames the trial video must contain.
    pub fn total_frames(&self) -> usize {
        self.segments.last().map(|s| s.last_frame + 1).unwrap_or(0)
    }

    /// Frame indices covered by Vibration segments, in order. Scoring
    /// is restricted to exactly these frames.
    pub fn vibration_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Vibration)
            .flat_map(|s| s.first_frame..=s.last_frame)
    }

    /// Wall-clock length of one replay, blip pulses included.
    pub fn replay_duration(&self, has_blip: bool, frames_per_second: u32) -> Duration {
        let mut seconds: f64 = self.segments.iter().map(|s| s.duration).sum();
        if has_blip {
            seconds += (self.segments.len() + 1) as f64 * 2.0 / frames_per_second as f64;
        }
        Duration::from_secs_f64(seconds)
    }

    /// Replay the timeline against an actuator. `stimulus` is present
    /// on active runs only; passive runs keep the speaker silent but
    /// still run airflow, waits and blip pulses.
    pub async fn execute<A: Actuator>(
        &self,
        actuator: &mut A,
        stimulus: Option<(StimulusModel, &[f64])>,
        has_blip: bool,
        frames_per_second: u32,
    ) {
        if has_blip {
            blip(actuator, frames_per_second).await;
        }
        for segment in &self.segments {
            tracing::debug!(segment = segment.description(), duration = segment.duration, "Segment start");
            match segment.kind {
                SegmentKind::Vibration => {
                    if let Some((model, parameters)) = stimulus {
                        model.apply(parameters, actuator).await;
                    }
                    sleep(Duration::from_secs_f64(segment.duration)).await;
                    if stimulus.is_some() {
                        actuator.speaker_standby().await;
                    }
                }
                SegmentKind::Airflow => {
                    actuator.set_airflow(1.0).await;
                    sleep(Duration::from_secs_f64(segment.duration)).await;
                    actuator.airflow_standby().await;
                }
                SegmentKind::NoStimuli => {
                    sleep(Duration::from_secs_f64(segment.duration)).await;
                }
            }
            if has_blip {
                blip(actuator, frames_per_second).await;
            }
        }
    }
}

/// Pulse the diagnostic LED for two frame periods: the visual
/// timestamp marker picked up by the camera.
async fn blip<A: Actuator>(actuator: &mut A, frames_per_second: u32) {
    actuator.set_led(0.125, 0.0, 0.0).await;
    sleep(Duration::from_secs_f64(2.0 / frames_per_second as f64)).await;
    actuator.led_standby().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(duration: f64, kind: SegmentKind) -> SegmentSpec {
        SegmentSpec { duration, kind, unit_index: -1, description: None }
    }

    fn three_part_timeline() -> Timeline {
        Timeline::from_specs(&[
            spec(30.0, SegmentKind::NoStimuli),
            spec(60.0, SegmentKind::Vibration),
            spec(15.0, SegmentKind::Airflow),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_empty_and_non_positive_durations() {
        assert!(matches!(Timeline::from_specs(&[]), Err(TimelineError::Empty)));
        let err = Timeline::from_specs(&[spec(0.0, SegmentKind::Vibration)]).unwrap_err();
        assert!(matches!(err, TimelineError::BadDuration { index: 0, .. }));
    }

    #[test]
    fn segments_shorter_than_one_frame_are_refused() {
        // 0.1 s rounds to zero frames at 4 fps; an inclusive frame
        // range cannot represent that.
        let mut timeline = Timeline::from_specs(&[
            spec(0.1, SegmentKind::Vibration),
            spec(30.0, SegmentKind::NoStimuli),
        ])
        .unwrap();
        let err = timeline.compute_first_last_frames(4, false).unwrap_err();
        assert!(matches!(
            err,
            TimelineError::TooShort { index: 0, frames_per_second: 4, .. }
        ));
        // the same timeline resolves at a frame rate that covers it.
        timeline.compute_first_last_frames(20, false).unwrap();
        assert_eq!(timeline.segments()[0].last_frame, 1);
    }

    #[test]
    fn frame_ranges_without_blip_are_contiguous() {
        let mut timeline = three_part_timeline();
        timeline.compute_first_last_frames(4, false).unwrap();
        let segs = timeline.segments();
        assert_eq!((segs[0].first_frame, segs[0].last_frame), (0, 119));
        assert_eq!((segs[1].first_frame, segs[1].last_frame), (120, 359));
        assert_eq!((segs[2].first_frame, segs[2].last_frame), (360, 419));
        assert_eq!(timeline.total_frames(), 420);
    }

    #[test]
    fn frame_ranges_with_blip_reserve_spacers() {
        let mut timeline = three_part_timeline();
        timeline.compute_first_last_frames(4, true).unwrap();
        let segs = timeline.segments();
        assert_eq!((segs[0].first_frame, segs[0].last_frame), (1, 120));
        assert_eq!((segs[1].first_frame, segs[1].last_frame), (123, 362));
        assert_eq!((segs[2].first_frame, segs[2].last_frame), (365, 424));
        // one leading frame plus two spacers per gap
        let per_segment: usize = segs.iter().map(|s| s.frame_count(4)).sum();
        assert_eq!(timeline.total_frames(), per_segment + 1 + 2 * (segs.len() - 1));
    }

    #[test]
    fn frame_ranges_are_strictly_increasing_and_disjoint() {
        for has_blip in [false, true] {
            let mut timeline = three_part_timeline();
            timeline.compute_first_last_frames(8, has_blip).unwrap();
            let segs = timeline.segments();
            for pair in segs.windows(2) {
                assert!(pair[0].last_frame >= pair[0].first_frame);
                assert!(pair[1].first_frame > pair[0].last_frame);
            }
        }
    }

    #[test]
    fn recompute_overwrites_previous_trial_ranges() {
        let mut timeline = three_part_timeline();
        timeline.compute_first_last_frames(4, true).unwrap();
        let with_blip = timeline.total_frames();
        timeline.compute_first_last_frames(4, false).unwrap();
        assert_eq!(timeline.total_frames(), 420);
        assert_ne!(timeline.total_frames(), with_blip);
    }

    #[test]
    fn vibration_frames_cover_only_vibration_segments() {
        let mut timeline = three_part_timeline();
        timeline.compute_first_last_frames(4, false).unwrap();
        let frames: Vec<usize> = timeline.vibration_frames().collect();
        assert_eq!(frames.first(), Some(&120));
        assert_eq!(frames.last(), Some(&359));
        assert_eq!(frames.len(), 240);
    }

    #[test]
    fn timeline_specs_round_trip_through_json() {
        let json = r#"[
            {"duration": 30.0, "type": "no stimuli"},
            {"duration": 60.0, "type": "vibration", "unit_index": 0, "description": "probe"},
            {"duration": 15.0, "type": "airflow"}
        ]"#;
        let specs: Vec<SegmentSpec> = serde_json::from_str(json).unwrap();
        let timeline = Timeline::from_specs(&specs).unwrap();
        assert_eq!(timeline.segments()[1].description(), "probe");
        assert_eq!(timeline.segments()[0].description(), "no stimuli");
        assert_eq!(timeline.segments()[1].unit_index, 0);
    }
}
