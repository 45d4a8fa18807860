//! Reduction of repeated trial scores into one fitness value.

use clap::ValueEnum;

use crate::config::ConfigError;

/// How a candidate's repeated trial scores become one fitness value.
///
/// A closed set of variants rather than a name-keyed table: an unknown
/// policy cannot exist past argument parsing, so the run can never
/// fail on a lookup after trials have started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReductionPolicy {
    /// Arithmetic mean over the repeats.
    Average,
    /// Drop one best and one worst score, average the remainder.
    AverageWithoutBestWorst,
    /// Mean scaled down by the score range across repeats.
    RangeValueWeightedAverage,
    /// Mean scaled down by twice the standard deviation across repeats.
    StdDevWeightedAverage,
}

impl ReductionPolicy {
    /// Startup check of policy parameters. The trimmed mean divides by
    /// `repeats - 2`, so fewer than three repeats must be refused
    /// before any trial runs.
    pub fn validate(self, repeats: usize) -> Result<(), ConfigError> {
        if self == ReductionPolicy::AverageWithoutBestWorst && repeats < 3 {
            return Err(ConfigError::NotEnoughRepeats { repeats });
        }
        Ok(())
    }

    /// Reduce one candidate's scores. `score_range` is the width of
    /// the achievable trial-score interval, used by the weighted
    /// variants to normalize their variance penalty.
    pub fn reduce(self, scores: &[f64], repeats: usize, score_range: f64) -> f64 {
        let sum: f64 = scores.iter().sum();
        let mean = sum / repeats as f64;
        match self {
            ReductionPolicy::Average => mean,
            ReductionPolicy::AverageWithoutBestWorst => {
                (sum - best(scores) - worst(scores)) / (repeats - 2) as f64
            }
            ReductionPolicy::RangeValueWeightedAverage => {
                let spread = best(scores) - worst(scores);
                mean * ((score_range - spread) / score_range)
            }
            ReductionPolicy::StdDevWeightedAverage => {
                mean * ((score_range - 2.0 * stddev(scores, mean)) / score_range)
            }
        }
    }
}

fn best(scores: &[f64]) -> f64 {
    scores.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn worst(scores: &[f64]) -> f64 {
    scores.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Population standard deviation.
fn stddev(scores: &[f64], mean: f64) -> f64 {
    let variance =
        scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / scores.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_mean_needs_three_repeats() {
        assert!(matches!(
            ReductionPolicy::AverageWithoutBestWorst.validate(2),
            Err(ConfigError::NotEnoughRepeats { repeats: 2 })
        ));
        assert!(ReductionPolicy::AverageWithoutBestWorst.validate(3).is_ok());
        assert!(ReductionPolicy::Average.validate(1).is_ok());
    }

    #[test]
    fn trimmed_mean_drops_one_best_and_one_worst() {
        let scores = [1.0, 2.0, 3.0, 4.0, 100.0];
        let reduced = ReductionPolicy::AverageWithoutBestWorst.reduce(&scores, 5, 200.0);
        assert_eq!(reduced, 3.0);
    }

    #[test]
    fn average_is_the_plain_mean() {
        assert_eq!(ReductionPolicy::Average.reduce(&[10.0, 20.0, 30.0], 3, 100.0), 20.0);
    }

    #[test]
    fn range_weight_penalizes_spread() {
        // mean 20, spread 20, range 100: weight 0.8.
        let reduced =
            ReductionPolicy::RangeValueWeightedAverage.reduce(&[10.0, 20.0, 30.0], 3, 100.0);
        assert!((reduced - 16.0).abs() < 1e-9);
        // identical scores keep the full mean.
        let steady =
            ReductionPolicy::RangeValueWeightedAverage.reduce(&[20.0, 20.0, 20.0], 3, 100.0);
        assert_eq!(steady, 20.0);
    }

    #[test]
    fn stddev_weight_penalizes_variance() {
        // stddev of [10, 20, 30] is sqrt(200/3).
        let sd = (200.0f64 / 3.0).sqrt();
        let expected = 20.0 * ((100.0 - 2.0 * sd) / 100.0);
        let reduced = ReductionPolicy::StdDevWeightedAverage.reduce(&[10.0, 20.0, 30.0], 3, 100.0);
        assert!((reduced - expected).abs() < 1e-9);
    }
}
