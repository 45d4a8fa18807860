//! Append-only result logs.
//!
//! All four logs are comma-delimited flat files opened in append mode
//! and written by the single controller process; nothing is ever
//! rewritten. The population log is written before a generation is
//! evaluated so a durable record exists even if evaluation fails
//! half-way.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use evostim_protocol::types::UnitId;

/// One row of the evaluation log: a single fitness trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub generation: u32,
    pub episode: u32,
    /// Trial number within the episode.
    pub trial: u32,
    pub arena: usize,
    pub active_unit: UnitId,
    /// Wall-clock start of stimulus playback, for correlating with the
    /// captured video.
    pub started_at: DateTime<Utc>,
    pub score: f64,
    pub parameters: Vec<f64>,
}

impl TrialRecord {
    pub fn to_row(&self) -> String {
        let mut row = format!(
            "{},{},{},{},{},{},{}",
            self.generation,
            self.episode,
            self.trial,
            self.arena,
            self.active_unit,
            self.started_at.to_rfc3339(),
            self.score,
        );
        for gene in &self.parameters {
            let _ = write!(row, ",{gene}");
        }
        row
    }

    pub fn parse(row: &str) -> Result<Self> {
        let fields: Vec<&str> = row.trim().split(',').collect();
        if fields.len() < 7 {
            anyhow::bail!("evaluation row has {} fields, expected at least 7", fields.len());
        }
        let parameters = fields[7..]
            .iter()
            .map(|f| f.parse::<f64>().context("bad gene value"))
            .collect::<Result<Vec<f64>>>()?;
        Ok(TrialRecord {
            generation: fields[0].parse().context("bad generation")?,
            episode: fields[1].parse().context("bad episode")?,
            trial: fields[2].parse().context("bad trial index")?,
            arena: fields[3].parse().context("bad arena index")?,
            active_unit: fields[4].parse().context("bad unit id")?,
            started_at: DateTime::parse_from_rfc3339(fields[5])
                .context("bad start timestamp")?
                .with_timezone(&Utc),
            score: fields[6].parse().context("bad score")?,
            parameters,
        })
    }
}

/// The run's log directory.
pub struct ExperimentLogs {
    dir: PathBuf,
}

impl ExperimentLogs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Raw candidate population, one row per candidate:
    /// `generation,gene,gene,...`.
    pub fn append_population(&self, generation: u32, candidates: &[Vec<f64>]) -> Result<()> {
        let mut rows = String::new();
        for candidate in candidates {
            let _ = write!(rows, "{generation}");
            for gene in candidate {
                let _ = write!(rows, ",{gene}");
            }
            rows.push('\n');
        }
        self.append("population.csv", &rows)
    }

    /// One completed trial.
    pub fn append_trial(&self, record: &TrialRecord) -> Result<()> {
        self.append("evaluation.csv", &format!("{}\n", record.to_row()))
    }

    /// Per-candidate reduced fitness:
    /// `generation,episode,fitness,gene,gene,...`.
    pub fn append_fitness(
        &self,
        generation: u32,
        episode: u32,
        fitness: f64,
        parameters: &[f64],
    ) -> Result<()> {
        let mut row = format!("{generation},{episode},{fitness}");
        for gene in parameters {
            let _ = write!(row, ",{gene}");
        }
        row.push('\n');
        self.append("fitness.csv", &row)
    }

    /// Per-frame metric rows for one trial, under the arena's column
    /// names. Written whole once the trial's frames are analysed.
    pub fn write_frame_metrics(
        &self,
        episode: u32,
        trial: u32,
        header: &[String],
        rows: &[Vec<f64>],
    ) -> std::io::Result<()> {
        let mut text = header.join(",");
        text.push('\n');
        for row in rows {
            let mut fields = row.iter().map(f64::to_string);
            if let Some(first) = fields.next() {
                text.push_str(&first);
            }
            for field in fields {
                text.push(',');
                text.push_str(&field);
            }
            text.push('\n');
        }
        let name = format!("frame-metrics_{episode:03}_{trial:03}.csv");
        std::fs::write(self.dir.join(name), text)
    }

    fn append(&self, name: &str, text: &str) -> Result<()> {
        let path = self.dir.join(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("appending to {}", path.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_record_row_round_trips() {
        let record = TrialRecord {
            generation: 4,
            episode: 2,
            trial: 17,
            arena: 1,
            active_unit: 9,
            started_at: "2026-08-29T14:03:27.500Z".parse().unwrap(),
            score: 123.5,
            parameters: vec![440.0, 312.5, 50.0],
        };
        let parsed = TrialRecord::parse(&record.to_row()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn short_rows_are_refused() {
        assert!(TrialRecord::parse("1,2,3").is_err());
    }

    #[test]
    fn logs_only_ever_grow() {
        let dir = tempfile::tempdir().unwrap();
        let logs = ExperimentLogs::new(dir.path());
        logs.append_population(0, &[vec![1.0, 2.0]]).unwrap();
        logs.append_population(1, &[vec![3.0, 4.0]]).unwrap();
        let text = std::fs::read_to_string(dir.path().join("population.csv")).unwrap();
        assert_eq!(text, "0,1,2\n1,3,4\n");
        logs.append_fitness(1, 1, 20.0, &[3.0, 4.0]).unwrap();
        let text = std::fs::read_to_string(dir.path().join("fitness.csv")).unwrap();
        assert_eq!(text, "1,1,20,3,4\n");
    }
}
