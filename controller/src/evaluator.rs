//! The fitness evaluation pipeline.
//!
//! [`Evaluator::evaluate_population`] is the callback an external
//! population-based optimizer drives: candidates in, one fitness value
//! per candidate out, in the same order. Trials run strictly one at a
//! time — only one arena's subjects may be disturbed at once and there
//! is a single camera — but the order of the repeats is shuffled
//! across the whole generation so systematic drift in the lab (wax
//! warming, subject fatigue) is decorrelated from any one candidate.

use std::future::Future;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;

use evostim_protocol::types::UnitId;
use evostim_protocol::Timeline;

use crate::capture::FrameSource;
use crate::config::Config;
use crate::episode::{Episode, OperatorPrompt};
use crate::error::RunError;
use crate::logs::{ExperimentLogs, TrialRecord};
use crate::reduce::ReductionPolicy;

/// Outcome of one completed trial.
#[derive(Debug, Clone)]
pub struct Trial {
    pub episode: u32,
    pub trial_in_episode: u32,
    pub arena_index: usize,
    pub active_unit: UnitId,
    /// When stimulus playback began on the active unit.
    pub started_at: DateTime<Utc>,
    pub score: f64,
}

/// One stimulus-dispatch-and-score cycle. The hardware implementation
/// talks to arenas and the camera; tests script it.
pub trait TrialRunner: Send {
    fn run_trial(
        &mut self,
        parameters: &[f64],
    ) -> impl Future<Output = Result<Trial, RunError>> + Send;
}

pub struct Evaluator<R: TrialRunner> {
    runner: R,
    logs: ExperimentLogs,
    repeats: usize,
    reduction: ReductionPolicy,
    score_range: f64,
    generation: u32,
}

impl<R: TrialRunner> Evaluator<R> {
    pub fn new(
        runner: R,
        logs: ExperimentLogs,
        repeats: usize,
        reduction: ReductionPolicy,
        score_range: f64,
    ) -> Self {
        Self { runner, logs, repeats, reduction, score_range, generation: 0 }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Evaluate one generation. Returns the reduced fitness of each
    /// candidate, positionally aligned with the input.
    pub async fn evaluate_population(&mut self, candidates: &[Vec<f64>]) -> Result<Vec<f64>> {
        // The raw population goes to disk before anything runs, so a
        // failed generation still leaves a durable record.
        self.logs
            .append_population(self.generation, candidates)
            .context("persisting the candidate population")?;

        let mut sequence: Vec<usize> = (0..candidates.len())
            .flat_map(|index| std::iter::repeat(index).take(self.repeats))
            .collect();
        sequence.shuffle(&mut rand::thread_rng());

        let mut scores: Vec<Vec<f64>> = vec![Vec::new(); candidates.len()];
        let mut last_episode = 1;
        for index in sequence {
            let parameters = &candidates[index];
            let trial = self.runner.run_trial(parameters).await?;
            tracing::info!(
                candidate = index,
                score = trial.score,
                episode = trial.episode,
                "Trial finished"
            );
            self.logs.append_trial(&TrialRecord {
                generation: self.generation,
                episode: trial.episode,
                trial: trial.trial_in_episode,
                arena: trial.arena_index,
                active_unit: trial.active_unit,
                started_at: trial.started_at,
                score: trial.score,
                parameters: parameters.clone(),
            })?;
            last_episode = trial.episode;
            scores[index].push(trial.score);
        }

        // Aggregation is keyed by candidate index, so the fitness
        // vector is deterministic no matter how the trials were
        // interleaved.
        let result: Vec<f64> = scores
            .iter()
            .map(|s| self.reduction.reduce(s, self.repeats, self.score_range))
            .collect();
        for (fitness, candidate) in result.iter().zip(candidates) {
            self.logs.append_fitness(self.generation, last_episode, *fitness, candidate)?;
        }
        tracing::info!(generation = self.generation, ?result, "Generation fitness");
        self.generation += 1;
        Ok(result)
    }
}

/// The real trial runner: arenas, stimulus dispatch, frame capture
/// and scoring against live hardware.
pub struct HardwareTrialRunner<P: OperatorPrompt, F: FrameSource> {
    config: Config,
    episode: Episode<P>,
    frames: F,
    timeline: Timeline,
    logs: ExperimentLogs,
}

impl<P: OperatorPrompt, F: FrameSource> HardwareTrialRunner<P, F> {
    pub fn new(
        config: Config,
        episode: Episode<P>,
        frames: F,
        timeline: Timeline,
        logs: ExperimentLogs,
    ) -> Self {
        Self { config, episode, frames, timeline, logs }
    }

    pub fn into_episode(self) -> Episode<P> {
        self.episode
    }
}

impl<P: OperatorPrompt, F: FrameSource> TrialRunner for HardwareTrialRunner<P, F> {
    async fn run_trial(&mut self, parameters: &[f64]) -> Result<Trial, RunError> {
        let config = &self.config;
        self.episode.increment_evaluation_counter();
        tracing::info!(
            episode = self.episode.index,
            evaluation = self.episode.evaluation_in_episode,
            "Starting trial"
        );

        // Frame counters are per trial; recompute before dispatch.
        self.timeline
            .compute_first_last_frames(config.frames_per_second, config.has_blip)?;
        let needed = self.timeline.total_frames();
        let replay = self
            .timeline
            .replay_duration(config.has_blip, config.frames_per_second);

        let picked = self.episode.select_arena(config).await?;
        let arena = &mut self.episode.arenas[picked];

        // Blow the subjects off the units before playback so every
        // trial starts from a dispersed group.
        if let Some(duration) = config.spread_duration {
            arena.spread_subjects(duration, config).await?;
        }

        // Capture covers the whole playback window, so both run at
        // once and the trial waits on the slower of the two.
        let (analysis, started_at) = tokio::join!(
            self.frames.capture(needed, config.frames_per_second),
            arena.run_stimulus(parameters, config, replay),
        );
        let mut analysis = analysis?;
        let started_at = started_at?;
        analysis.require(needed)?;
        analysis.mask_initial_movement(config.delta_frames());

        self.logs.write_frame_metrics(
            self.episode.index,
            self.episode.evaluation_in_episode,
            &arena.metric_column_names(),
            analysis.rows(),
        )?;

        // Only frames inside vibration segments count.
        let rows = analysis.rows();
        let score: f64 = self
            .timeline
            .vibration_frames()
            .map(|frame| {
                config
                    .fitness
                    .compute(&config.thresholds, arena.selected_roi_index, &rows[frame])
            })
            .sum();

        Ok(Trial {
            episode: self.episode.index,
            trial_in_episode: self.episode.evaluation_in_episode,
            arena_index: arena.index,
            active_unit: arena.active_unit_id(),
            started_at,
            score,
        })
    }
}
