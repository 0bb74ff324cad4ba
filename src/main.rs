//! leakrig - Main Entry Point
//!
//! Command-line replayer for recorded sensor vector sequences.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leakrig::{
    config::ReplayConfig, CsvRecorder, PlaybackState, Recording, ReplayScheduler, VectorStream,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the replay command checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time given to subscribers after the last vector before shutting down
const COMPLETION_GRACE: Duration = Duration::from_millis(250);

/// Replay recorded sensor vectors with their original timing
#[derive(Parser, Debug)]
#[command(name = "leakrig")]
#[command(version)]
struct Args {
    /// Directory for daily rolling log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a recording back in real time
    Replay {
        /// Recording file (JSON)
        recording: PathBuf,

        /// Speed factor, overriding the config file
        #[arg(short, long)]
        speed: Option<f64>,

        /// Publish recorded timestamps instead of shifting them to now
        #[arg(long)]
        original_timestamps: bool,

        /// Also write replayed vectors to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Replay settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print a recording's metadata
    Inspect {
        /// Recording file (JSON)
        recording: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref())?;

    match args.command {
        Command::Replay {
            recording,
            speed,
            original_timestamps,
            csv,
            config,
        } => replay(&recording, speed, original_timestamps, csv, config.as_deref()),
        Command::Inspect { recording } => inspect(&recording),
    }
}

fn init_logging(
    log_dir: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "leakrig.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,leakrig=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn replay(
    path: &Path,
    speed: Option<f64>,
    original_timestamps: bool,
    csv: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::load_or_default(),
    };
    if let Some(speed) = speed {
        config.speed = speed;
    }
    config.use_original_timestamps |= original_timestamps;

    let recording = Recording::load_from_file(path)?;
    recording.validate()?;
    tracing::info!(
        "Loaded recording '{}' ({} vectors over {} ms)",
        recording.metadata.name,
        recording.len(),
        recording.duration_ms()
    );

    let player = ReplayScheduler::from_config(&config)?.with_sensors(config.load_sensors()?);
    player.subscribe(|vector| {
        tracing::info!("{} readings @{}", vector.len(), vector.timestamp_ms());
        for error in vector.errors() {
            tracing::warn!("{}: {}", error.sensor_id, error.message);
        }
        Ok(())
    });
    if let Some(csv) = csv {
        tracing::info!("Recording replay to {}", csv.display());
        player.subscribe_handler(Arc::new(CsvRecorder::for_stream(csv, &player)));
    }

    let start_time = chrono::Utc::now().timestamp_millis();
    player.start_playback(recording.vectors, start_time, config.use_original_timestamps)?;

    while player.state() == PlaybackState::Playing {
        std::thread::sleep(POLL_INTERVAL);
    }
    std::thread::sleep(COMPLETION_GRACE);

    tracing::info!("Replay finished, shutting down");
    player.shutdown();
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let recording = Recording::load_from_file(path)?;
    let meta = &recording.metadata;
    println!("Name:        {}", meta.name);
    if let Some(description) = &meta.description {
        println!("Description: {}", description);
    }
    println!("Recorded at: {}", meta.recorded_at.to_rfc3339());
    println!("Vectors:     {}", recording.len());
    println!("Duration:    {} ms", recording.duration_ms());
    if let (Some(first), Some(last)) = (recording.vectors.first(), recording.vectors.last()) {
        println!("Time range:  {} .. {}", first.timestamp_ms(), last.timestamp_ms());
    }
    match recording.validate() {
        Ok(()) => println!("Replayable:  yes"),
        Err(e) => println!("Replayable:  no ({})", e),
    }
    Ok(())
}
