//! Frame capture and pixel-difference analysis seam.
//!
//! Video recording, splitting and region-mask pixel differencing run
//! outside this process. The pipeline only needs the result: one row
//! per captured frame with a `(background_diff, previous_diff)` pair
//! per region of interest, where `background_diff` counts pixels that
//! differ from the episode's background image and `previous_diff`
//! counts pixels that differ from the frame a fixed interval earlier.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunError;

/// Marker for a movement value that does not exist, such as the first
/// frames of a video which have no earlier frame to compare against.
pub const UNDEFINED: f64 = -1.0;

/// Pixel-difference rows for one captured video.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    rows: Vec<Vec<f64>>,
}

impl FrameAnalysis {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn frame_count(&self) -> usize {
        self.rows.len()
    }

    /// The first `delta_frames` frames of a video have no earlier
    /// frame to diff against, so their movement columns carry no
    /// information. Overwrite them with [`UNDEFINED`] regardless of
    /// what the external pipeline wrote there.
    pub fn mask_initial_movement(&mut self, delta_frames: usize) {
        for row in self.rows.iter_mut().take(delta_frames) {
            for column in (1..row.len()).step_by(2) {
                row[column] = UNDEFINED;
            }
        }
    }

    /// A short capture aborts the trial; the missing frames are never
    /// substituted.
    pub fn require(&self, needed: usize) -> Result<(), RunError> {
        if self.rows.len() < needed {
            return Err(RunError::CaptureFailure { needed, got: self.rows.len() });
        }
        Ok(())
    }
}

/// Source of analysed frames for one trial. The capture runs for the
/// trial's whole playback window, concurrently with the stimulus
/// dispatch, and resolves once all rows are available.
pub trait FrameSource: Send {
    fn capture(
        &mut self,
        frame_count: usize,
        frames_per_second: u32,
    ) -> impl Future<Output = Result<FrameAnalysis, RunError>> + Send;
}

/// Reads pixel-difference rows produced by the external video
/// pipeline from a comma-delimited file, after waiting out the
/// capture window.
pub struct CsvFrameSource {
    path: PathBuf,
}

impl CsvFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for CsvFrameSource {
    async fn capture(
        &mut self,
        frame_count: usize,
        frames_per_second: u32,
    ) -> Result<FrameAnalysis, RunError> {
        let window = Duration::from_secs_f64(frame_count as f64 / frames_per_second as f64);
        tracing::info!(frame_count, ?window, path = %self.path.display(), "Capturing frames");
        tokio::time::sleep(window).await;
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut rows = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row = line
                .split(',')
                .map(|field| field.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|_| {
                    tracing::warn!(path = %self.path.display(), "Unparseable frame-metric row");
                    RunError::CaptureFailure { needed: frame_count, got: rows.len() }
                })?;
            rows.push(row);
        }
        let analysis = FrameAnalysis::new(rows);
        analysis.require(frame_count)?;
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_captures_are_refused() {
        let analysis = FrameAnalysis::new(vec![vec![0.0, UNDEFINED]; 10]);
        assert!(analysis.require(10).is_ok());
        let err = analysis.require(11).unwrap_err();
        assert!(matches!(err, RunError::CaptureFailure { needed: 11, got: 10 }));
    }

    #[test]
    fn movement_prefix_is_masked_per_region() {
        let mut analysis = FrameAnalysis::new(vec![
            vec![120.0, 55.0, 300.0, 80.0],
            vec![130.0, 40.0, 310.0, 75.0],
            vec![90.0, 15.0, 305.0, 60.0],
        ]);
        analysis.mask_initial_movement(2);
        assert_eq!(analysis.rows()[0], vec![120.0, UNDEFINED, 300.0, UNDEFINED]);
        assert_eq!(analysis.rows()[1], vec![130.0, UNDEFINED, 310.0, UNDEFINED]);
        // presence columns and later rows are untouched.
        assert_eq!(analysis.rows()[2], vec![90.0, 15.0, 305.0, 60.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn csv_source_parses_external_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diffs.csv");
        std::fs::write(&path, "120,-1\n130,40\n90,15\n").unwrap();
        let mut source = CsvFrameSource::new(&path);
        let analysis = source.capture(3, 1).await.unwrap();
        assert_eq!(analysis.frame_count(), 3);
        assert_eq!(analysis.rows()[0], vec![120.0, UNDEFINED]);
        assert_eq!(analysis.rows()[2], vec![90.0, 15.0]);
    }
}
