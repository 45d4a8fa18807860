use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use evostim_protocol::channel::CommandTimeouts;
use evostim_protocol::types::UnitId;
use evostim_protocol::{
    SegmentSpec, StimulusModel, Timeline, UnitChannel, UnitReply, UnitRequest,
};

use evostim_controller::arena::{Arena, UnitPool, UnitStub};
use evostim_controller::capture::CsvFrameSource;
use evostim_controller::config::Config;
use evostim_controller::episode::{Episode, StdinPrompt};
use evostim_controller::evaluator::{Evaluator, HardwareTrialRunner};
use evostim_controller::fitness::{self, Thresholds};
use evostim_controller::logs::ExperimentLogs;
use evostim_controller::reduce::ReductionPolicy;

#[derive(Parser)]
#[command(
    name = "evostim-controller",
    about = "evostim controller: evaluates a candidate population on live subjects across a fleet of CASU units"
)]
struct Cli {
    /// Unit endpoints as ID=HOST:PORT, one per unit
    #[arg(long = "unit", required = true)]
    units: Vec<String>,

    /// Arena compositions as comma-separated unit ids, one per arena
    #[arg(long = "arena", required = true)]
    arenas: Vec<String>,

    /// Units per arena that run the stimulus actively
    #[arg(long, default_value = "1")]
    active_units: usize,

    /// JSON file with the ordered segment timeline
    #[arg(long, env = "EVOSTIM_SEGMENTS")]
    segments_file: PathBuf,

    /// File with one candidate per line, genes comma-separated
    #[arg(long)]
    population_file: PathBuf,

    /// File where the external video pipeline leaves per-frame
    /// pixel-difference rows
    #[arg(long)]
    frame_metrics_file: PathBuf,

    /// Directory for the append-only result logs
    #[arg(long, default_value = "logs", env = "EVOSTIM_LOG_DIR")]
    log_dir: PathBuf,

    #[arg(long, default_value = "4")]
    frames_per_second: u32,

    /// Pulse the indicator light before and after every segment
    #[arg(long)]
    blip: bool,

    /// Fitness evaluations per candidate
    #[arg(long, default_value = "3")]
    repeats: usize,

    /// Evaluations before the subject group is swapped
    #[arg(long, default_value = "20")]
    evaluations_per_episode: u32,

    #[arg(long, value_enum, default_value = "average")]
    reduction: ReductionPolicy,

    /// Fitness function code, e.g. F_m_a or B_bm_ap
    #[arg(long, default_value = "F_m_a")]
    fitness: String,

    /// Pixel count above which a region counts as occupied
    #[arg(long, default_value = "1000")]
    background_threshold: f64,

    /// Pixel count below which a region counts as still
    #[arg(long, default_value = "500")]
    previous_threshold: f64,

    /// Seconds between the frames compared for movement
    #[arg(long, default_value = "1")]
    movement_interval: u32,

    /// Airflow burst in seconds dispersing the subjects before each
    /// trial; omit to skip the burst
    #[arg(long)]
    spread_duration: Option<f64>,

    #[arg(long, value_parser = parse_stimulus_model, default_value = "single-pulse-frequency-pause")]
    stimulus_model: StimulusModel,

    /// Peltier reference temperature in °C
    #[arg(long, default_value = "28.0")]
    target_temperature: f64,

    #[arg(long, default_value = "1.0")]
    temperature_tolerance: f64,

    /// Largest acceptable reading difference between units of one arena
    #[arg(long, default_value = "1.0")]
    max_temperature_spread: f64,
}

fn parse_stimulus_model(text: &str) -> Result<StimulusModel, String> {
    match text {
        "single-pulse-frequency-pause" => Ok(StimulusModel::SinglePulseFrequencyPause),
        "single-pulse-frequency-pause-amplitude" => {
            Ok(StimulusModel::SinglePulseFrequencyPauseAmplitude)
        }
        other => Err(format!("unknown stimulus model {other:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let specs = load_segments(&cli.segments_file)?;
    let mut timeline = Timeline::from_specs(&specs)?;
    timeline.compute_first_last_frames(cli.frames_per_second, cli.blip)?;

    let config = Config {
        frames_per_second: cli.frames_per_second,
        has_blip: cli.blip,
        repeats: cli.repeats,
        evaluations_per_episode: cli.evaluations_per_episode,
        reduction: cli.reduction,
        fitness: fitness::resolve(&cli.fitness)?,
        thresholds: Thresholds {
            background: cli.background_threshold,
            previous: cli.previous_threshold,
        },
        movement_interval: cli.movement_interval,
        spread_duration: cli.spread_duration,
        stimulus_model: cli.stimulus_model,
        target_temperature: cli.target_temperature,
        temperature_tolerance: cli.temperature_tolerance,
        max_temperature_spread: cli.max_temperature_spread,
        timeouts: CommandTimeouts::default(),
    };

    let candidates = load_population(&cli.population_file)?;

    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("creating log directory {}", cli.log_dir.display()))?;

    let mut pool = connect_units(&cli.units).await?;
    initialise_units(&mut pool, &config, &specs).await?;
    let arenas = build_arenas(&cli.arenas, cli.active_units, &mut pool)?;

    // Validation must finish before the first trial: a bad reduction
    // or fitness setup is not allowed to surface mid-run.
    let smallest_arena = arenas.iter().map(Arena::unit_count).min().unwrap_or(0);
    config.validate(smallest_arena)?;
    let score_range = config.score_range(&timeline);

    let episode = Episode::new(arenas, cli.evaluations_per_episode, StdinPrompt);
    let repeats = config.repeats;
    let reduction = config.reduction;
    let runner = HardwareTrialRunner::new(
        config,
        episode,
        CsvFrameSource::new(&cli.frame_metrics_file),
        timeline,
        ExperimentLogs::new(&cli.log_dir),
    );
    let mut evaluator = Evaluator::new(
        runner,
        ExperimentLogs::new(&cli.log_dir),
        repeats,
        reduction,
        score_range,
    );

    let result = evaluator.evaluate_population(&candidates).await;
    match &result {
        Ok(fitness) => tracing::info!(?fitness, "Population evaluated"),
        Err(e) => tracing::error!(error = %e, "Evaluation aborted"),
    }

    shutdown_units(evaluator.into_runner().into_episode(), &mut pool).await;
    result.map(|_| ())
}

fn load_segments(path: &PathBuf) -> Result<Vec<SegmentSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading segment timeline {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_population(path: &PathBuf) -> Result<Vec<Vec<f64>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading population {}", path.display()))?;
    let mut candidates = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let genes = line
            .split(',')
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .with_context(|| format!("bad candidate row {line:?}"))?;
        candidates.push(genes);
    }
    if candidates.is_empty() {
        bail!("population file {} holds no candidates", path.display());
    }
    Ok(candidates)
}

async fn connect_units(specs: &[String]) -> Result<UnitPool> {
    let mut stubs = Vec::new();
    for spec in specs {
        let (id, addr) = spec
            .split_once('=')
            .with_context(|| format!("unit spec {spec:?} is not ID=HOST:PORT"))?;
        let unit_id: UnitId = id.parse().with_context(|| format!("bad unit id {id:?}"))?;
        let channel = UnitChannel::connect(unit_id, addr)
            .await
            .with_context(|| format!("connecting to unit {unit_id} at {addr}"))?;
        stubs.push(UnitStub::new(channel));
    }
    Ok(UnitPool::new(stubs))
}

async fn initialise_units(
    pool: &mut UnitPool,
    config: &Config,
    specs: &[SegmentSpec],
) -> Result<()> {
    let request = UnitRequest::Initialise {
        frames_per_second: config.frames_per_second,
        segments: specs.to_vec(),
        has_blip: config.has_blip,
        stimulus_model: config.stimulus_model,
    };
    for stub in pool.stubs_mut() {
        let reply = stub
            .channel
            .request(&request, config.timeouts.control)
            .await
            .with_context(|| format!("initialising unit {}", stub.unit_id))?;
        match reply {
            UnitReply::Done => {}
            UnitReply::Rejected { reason } => {
                bail!("unit {} refused initialisation: {reason}", stub.unit_id)
            }
            other => bail!("unit {} answered initialisation with {other:?}", stub.unit_id),
        }
    }
    Ok(())
}

fn build_arenas(specs: &[String], active_units: usize, pool: &mut UnitPool) -> Result<Vec<Arena>> {
    let mut arenas = Vec::new();
    for (index, spec) in specs.iter().enumerate() {
        let mut stubs = Vec::new();
        for field in spec.split(',') {
            let unit_id: UnitId = field
                .trim()
                .parse()
                .with_context(|| format!("bad unit id {field:?} in arena spec {spec:?}"))?;
            stubs.push(pool.claim(unit_id)?);
        }
        if stubs.is_empty() {
            bail!("arena spec {spec:?} names no units");
        }
        arenas.push(Arena::new(index + 1, stubs, active_units));
    }
    Ok(arenas)
}

/// Quiesce and stop every unit daemon. Failures here only get logged;
/// the evaluation result is already on disk.
async fn shutdown_units<P: evostim_controller::episode::OperatorPrompt>(
    episode: Episode<P>,
    pool: &mut UnitPool,
) {
    for arena in episode.arenas {
        arena.release(pool);
    }
    for stub in pool.stubs_mut() {
        match stub
            .channel
            .request(&UnitRequest::Terminate, Duration::from_secs(10))
            .await
        {
            Ok(_) => tracing::info!(unit_id = stub.unit_id, "Unit terminated"),
            Err(e) => tracing::warn!(unit_id = stub.unit_id, error = %e, "Terminate failed"),
        }
    }
}
