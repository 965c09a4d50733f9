//! burstrace - drive the arbitration loop with synthetic streams
//!
//! Usage:
//!   burstrace run --frames 100 --streams 3 --seed 7   → simulate and print a summary
//!   burstrace run --json                              → print telemetry as JSON
//!   burstrace dump-config                             → print the default config as TOML

use burstrace::frames::{FrameSource, Voice, DEFAULT_SAMPLE_RATE_HZ};
use burstrace_core::{ArbiterConfig, StreamId};
use burstrace_engine::{ArbiterEvent, ArbitrationLoop, Telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "burstrace",
    about = "Competitive signal arbitration: burst synchronizer, race engine, attention focus",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed synthetic frames through the arbitration loop
    Run {
        /// Frames per stream
        #[arg(short, long, default_value_t = 100)]
        frames: usize,
        /// Number of concurrent streams
        #[arg(short, long, default_value_t = 3)]
        streams: usize,
        /// Seed for frames and races (races stay entropy-seeded without it)
        #[arg(long)]
        seed: Option<u64>,
        /// Config file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print telemetry as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the default config as TOML
    DumpConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::DumpConfig => {
            println!("{}", ArbiterConfig::default().to_toml());
        }
        Commands::Run {
            frames,
            streams,
            seed,
            config,
            json,
        } => {
            let _guard = init_tracing(cli.log_dir.as_deref())?;
            let mut config = match config {
                Some(path) => ArbiterConfig::load(&path),
                None => ArbiterConfig::default(),
            };
            if seed.is_some() {
                config.race.seed = seed;
            }
            let telemetry = run(config, frames, streams, seed.unwrap_or_default()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&telemetry)?);
            } else {
                print_summary(&telemetry);
            }
        }
    }

    Ok(())
}

fn init_tracing(log_dir: Option<&std::path::Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "burstrace.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burstrace=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn run(
    config: ArbiterConfig,
    frames: usize,
    streams: usize,
    seed: u64,
) -> anyhow::Result<Telemetry> {
    let frame_rate = config.sync.input_frame_rate_hz;
    let arbiter = Arc::new(ArbitrationLoop::new(config)?);

    let mut events = arbiter.subscribe();
    let watcher = tokio::spawn(async move {
        let mut shifts = 0usize;
        loop {
            match events.recv().await {
                Ok(ArbiterEvent::FocusShift { stream, pattern, .. }) => {
                    shifts += 1;
                    tracing::debug!(
                        "focus -> {} at {:.1} Hz ({} regions)",
                        stream,
                        pattern.frequency,
                        pattern.locations.len()
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("event watcher lagged by {}", n),
                Err(RecvError::Closed) => break,
            }
        }
        shifts
    });

    tracing::info!("simulating {} streams x {} frames at {} Hz", streams, frames, frame_rate);

    let tasks = (0..streams).map(|index| {
        let arbiter = arbiter.clone();
        tokio::spawn(async move {
            let stream = StreamId::new(format!("stream-{}", index));
            let source = FrameSource::new(
                Voice::for_stream(index),
                DEFAULT_SAMPLE_RATE_HZ,
                frame_rate,
                seed.wrapping_add(index as u64),
            );
            let mut wins = 0usize;
            for frame in source.take(frames) {
                let report = arbiter.process_frame(&stream, &frame).await?;
                if report.winner().is_some() {
                    wins += 1;
                }
            }
            Ok::<_, burstrace_core::Error>((stream, wins))
        })
    });

    for joined in futures::future::join_all(tasks).await {
        let (stream, wins) = joined??;
        tracing::info!("{}: {} of {} frames produced a winner", stream, wins, frames);
    }

    let telemetry = arbiter.telemetry();
    // Dropping the last loop handle closes the event channel and ends the watcher.
    drop(arbiter);
    let shifts = watcher.await?;
    tracing::info!("{} focus shifts observed", shifts);
    Ok(telemetry)
}

fn print_summary(telemetry: &Telemetry) {
    println!("streams: {}", telemetry.streams);
    println!(
        "races:   {} started, {} won, {} failed, {} cancelled",
        telemetry.races.started, telemetry.races.won, telemetry.races.failed, telemetry.races.cancelled
    );
    println!(
        "focus:   {} patterns, mean intensity {:.3}, mean binding {:.3}, {} frequency shifts",
        telemetry.focus.patterns,
        telemetry.focus.mean_intensity,
        telemetry.focus.mean_binding,
        telemetry.focus.frequency_shifts
    );
    if let Some(focus) = &telemetry.current_focus {
        let regions: Vec<&str> = focus.locations.iter().map(String::as_str).collect();
        println!(
            "current: {:.1} Hz, intensity {:.3}, binding {:.3} [{}]",
            focus.frequency,
            focus.intensity,
            focus.binding,
            regions.join(", ")
        );
    }
    println!("weights:");
    for entry in &telemetry.weights {
        let mean = entry
            .mean_win_ms
            .map(|ms| format!("{:.2} ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12} {:<10} {:>6.3}  wins {:>3}  mean {}",
            entry.stream_id.as_str(),
            entry.class.as_str(),
            entry.weight,
            entry.wins,
            mean
        );
    }
}
