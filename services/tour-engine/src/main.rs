//! tour-sim - simulate one museum day
//!
//! Starts a coordinator and a few guides, brings generated visitor groups in
//! while the museum is open, and logs a summary of the day at closing.
//!
//! Configuration comes from `GALERIE_*` environment variables; the flags
//! below override the most common ones. With `--events`, every monitoring
//! event is also written to stdout as one JSON line, for a dashboard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use galerie_events::GuideState;
use galerie_tour::monitor::{ChannelSink, FanoutSink, MonitoringSink, StatsSink, TracingSink};
use galerie_tour::{Museum, SimulationConfig};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Galerie tour simulator.
#[derive(Debug, Parser)]
#[command(name = "tour-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Guides on duty at opening.
    #[arg(long, env = "GALERIE_GUIDES")]
    guides: Option<usize>,

    /// Hard cap on real run time, in seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Simulated seconds per real second.
    #[arg(long)]
    time_scale: Option<f64>,

    /// Seed for every random draw of the run.
    #[arg(long, env = "GALERIE_SEED")]
    seed: Option<u64>,

    /// Number of exhibits on a tour.
    #[arg(long)]
    exhibits: Option<usize>,

    /// Write monitoring events to stdout as JSON lines.
    #[arg(long)]
    events: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

impl Cli {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(guides) = self.guides {
            config.initial_guides = guides;
        }
        if let Some(secs) = self.duration {
            config.simulation_duration = Duration::from_secs(secs);
        }
        if let Some(scale) = self.time_scale {
            config.time_scale = scale;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(exhibits) = self.exhibits {
            config.exhibit_count = exhibits;
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SimulationConfig::from_env().context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    init_tracing(&config.log_level, cli.log_format);

    info!(
        guides = config.initial_guides,
        exhibits = config.exhibit_count,
        time_scale = config.time_scale,
        duration_secs = config.simulation_duration.as_secs(),
        "Configuration loaded"
    );

    let stats = Arc::new(StatsSink::new());
    let mut fanout = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(stats.clone());

    let events_handle = if cli.events {
        let (sink, mut rx) = ChannelSink::new();
        fanout = fanout.with(Arc::new(sink));
        Some(tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope.to_json_line() {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!(error = %e, "Failed to encode event"),
                }
            }
        }))
    } else {
        None
    };
    let monitor: Arc<dyn MonitoringSink> = Arc::new(fanout);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut museum = Museum::new(config, monitor, shutdown_rx);
    museum.start();

    let mut run = tokio::spawn(async move { museum.run().await });

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            run.await
        }
        outcome = &mut run => outcome,
    }
    .context("museum task panicked")?;

    // Dropping the museum closed the last monitor handle; let the printer drain.
    if let Some(handle) = events_handle {
        if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
            error!("Event printer did not drain in time");
        }
    }

    let summary = stats.snapshot();
    info!(
        reason = ?outcome.reason,
        seed = outcome.seed,
        closed_at = %outcome.closed_at,
        elapsed_secs = outcome.elapsed.as_secs_f64(),
        guides = summary.guides,
        guides_blocked = stats.guides_in(GuideState::Blocked),
        groups_arrived = summary.groups_arrived,
        visitors_arrived = summary.visitors_arrived,
        groups_departed = summary.groups_departed,
        tours_completed = summary.tours_completed,
        exhibits_presented = summary.exhibits_presented,
        questions_asked = summary.questions_asked,
        incidents = outcome.incidents,
        average_satisfaction = ?summary.average_satisfaction(),
        average_tour_minutes = ?summary.average_tour_minutes(),
        "Museum day complete"
    );

    Ok(())
}
