//! Episodes: bounded sessions with one physical subject group.
//!
//! Subjects fatigue, so after a fixed number of evaluations the group
//! is swapped. The swap is manual lab work, modelled as an operator
//! prompt so the pipeline can pause for it without a timeout.

use rand::Rng;

use crate::arena::Arena;
use crate::config::Config;
use crate::error::RunError;

/// Human-in-the-loop seam. The binary wires this to stdin; tests
/// acknowledge automatically.
pub trait OperatorPrompt: Send {
    fn acknowledge(&mut self, message: &str);
}

/// Blocks on ENTER, like the lab operator expects.
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn acknowledge(&mut self, message: &str) {
        println!("{message}");
        println!("Press ENTER when ready.");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }
}

/// Pick an index by weight: `x` is a uniform draw in `[0, Σvalues)`
/// and the cursor walks forward until the running total passes it.
/// Ties carry no special treatment, the draw position decides. The
/// subtraction accumulates float error, so a residual draw past the
/// final bucket stays in the final bucket.
pub fn weighted_pick(values: &[f64], mut x: f64) -> usize {
    let mut picked = 0;
    while picked + 1 < values.len() && x >= values[picked] {
        x -= values[picked];
        picked += 1;
    }
    picked
}

pub struct Episode<P: OperatorPrompt> {
    pub index: u32,
    pub evaluation_in_episode: u32,
    evaluations_per_episode: u32,
    pub arenas: Vec<Arena>,
    prompt: P,
}

impl<P: OperatorPrompt> Episode<P> {
    pub fn new(arenas: Vec<Arena>, evaluations_per_episode: u32, prompt: P) -> Self {
        Self { index: 1, evaluation_in_episode: 0, evaluations_per_episode, arenas, prompt }
    }

    /// Advance the evaluation counter, swapping the subject group when
    /// the episode is spent.
    pub fn increment_evaluation_counter(&mut self) {
        if self.evaluation_in_episode == self.evaluations_per_episode {
            tracing::info!(episode = self.index, "Episode finished");
            self.prompt.acknowledge("Remove the subjects from the arena(s).");
            self.index += 1;
            self.prompt
                .acknowledge("Stage a fresh subject group and restore the arena floor.");
            self.evaluation_in_episode = 1;
        } else {
            self.evaluation_in_episode += 1;
        }
    }

    /// Check every arena's readiness and pick one of the suitable
    /// ones, weighted by suitability. When none is suitable the run
    /// pauses for the operator to correct the environment (usually
    /// waiting for the wax to cool) and checks again; there is no
    /// timeout and no data loss. Single-arena deployments skip the
    /// draw.
    pub async fn select_arena(&mut self, config: &Config) -> Result<usize, RunError> {
        loop {
            let mut values = Vec::with_capacity(self.arenas.len());
            let mut total = 0.0;
            for arena in &mut self.arenas {
                let (value, _readings) = arena.status(config).await?;
                total += value;
                values.push(value);
            }
            if total == 0.0 {
                tracing::warn!("{}", RunError::AllArenasUnhealthy);
                self.prompt.acknowledge(
                    "No arena is suitable for a trial; let the units cool down.",
                );
                continue;
            }
            if self.arenas.len() == 1 {
                return Ok(0);
            }
            let x = total * rand::thread_rng().gen::<f64>();
            let picked = weighted_pick(&values, x);
            tracing::info!(arena = self.arenas[picked].index, "Picked arena");
            return Ok(picked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn pick_lands_on_the_bucket_under_the_cursor() {
        let values = [2.0, 0.0, 3.0];
        assert_eq!(weighted_pick(&values, 0.0), 0);
        assert_eq!(weighted_pick(&values, 1.9), 0);
        // the zero-valued bucket can never be picked.
        assert_eq!(weighted_pick(&values, 2.0), 2);
        assert_eq!(weighted_pick(&values, 4.9), 2);
    }

    #[test]
    fn rounding_residue_lands_in_the_last_bucket() {
        // 0.1 + 0.2 + 0.3 sums to one ulp above 0.6, so walking the
        // buckets can leave a residual at least as large as the last
        // one; the pick must still name a real arena.
        let values = [0.1, 0.2, 0.3];
        let total: f64 = values.iter().sum();
        assert_eq!(weighted_pick(&values, total), 2);
        assert_eq!(weighted_pick(&[5.0], 5.0), 0);
    }

    #[test]
    fn pick_frequency_follows_the_weights() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let total: f64 = values.iter().sum();
        let mut rng = StdRng::seed_from_u64(9);
        let draws = 20_000;
        let mut counts = [0u32; 4];
        for _ in 0..draws {
            let x = total * rng.gen::<f64>();
            counts[weighted_pick(&values, x)] += 1;
        }
        for (count, value) in counts.iter().zip(&values) {
            let frequency = *count as f64 / draws as f64;
            assert!(
                (frequency - value / total).abs() < 0.02,
                "frequency {frequency} too far from {}",
                value / total
            );
        }
    }
}
