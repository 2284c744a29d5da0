// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! Vigil - Multi-Camera Stream Ingestion and Detection Pipeline
//!
//! Headless service: ingests camera streams, runs detection, stores events
//! and serves live views over WebSocket.

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vigil::storage::SqliteStore;
use vigil::{Config, Engine, EventQuery, EventStore, EventType, VERSION};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Vigil - Multi-Camera Stream Ingestion and Detection Pipeline
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author = "Vigil Project")]
#[command(version = VERSION)]
#[command(about = "Multi-camera RTSP ingestion, detection and event pipeline")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with synthetic cameras
    #[arg(long)]
    demo: bool,

    /// WebSocket live view port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Directory for the database and snapshots
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline (default)
    Run,

    /// Print stored events as JSON, newest first
    Events {
        /// Only events from this camera
        #[arg(long)]
        camera: Option<String>,

        /// Only events of this type (person, vehicle, animal, custom)
        #[arg(long = "type")]
        event_type: Option<EventType>,

        /// Maximum number of events
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.trace {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };

    let filter = if args.trace || args.debug {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Vigil v{} - Multi-Camera Detection Pipeline", VERSION);

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    if args.demo {
        config.demo_mode = true;
    }
    if let Some(data_dir) = &args.data_dir {
        config.set_data_dir(data_dir);
    }
    if let Some(port) = args.ws_port {
        config.live.websocket_port = port;
    }
    if config.demo_mode && config.cameras.is_empty() {
        config.cameras = Config::demo_cameras();
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;
    match args.command.unwrap_or(Command::Run) {
        Command::Run => rt.block_on(run(config)),
        Command::Events {
            camera,
            event_type,
            limit,
        } => rt.block_on(print_events(config, camera, event_type, limit)),
    }
}

/// Run the pipeline until Ctrl+C
async fn run(config: Config) -> Result<()> {
    info!(
        "Starting with {} camera(s), demo mode: {}",
        config.cameras.len(),
        config.demo_mode
    );
    if config.cameras.is_empty() {
        warn!("No cameras configured; add [[cameras]] entries or use --demo");
    }

    let mut engine = Engine::new(config).await?;
    engine.start().await?;

    if let Some(addr) = engine.live_addr() {
        info!("Live view on ws://{}/live/<camera>", addr);
    }
    info!("Press Ctrl+C to shutdown");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = status.tick() => {
                let state = engine.state().await;
                info!(
                    "Status: {}/{} cameras online, {} frames, {} inferences, {} events stored, {} dropped",
                    state.cameras_online,
                    state.cameras_configured,
                    state.frames_received,
                    state.inference.completed,
                    state.events.stored,
                    state.events.dropped
                );
            }
        }
    }

    info!("Shutdown signal received, cleaning up...");
    engine.stop().await?;
    info!("Vigil shutdown complete");

    Ok(())
}

/// Query the event store and print matches
async fn print_events(
    config: Config,
    camera: Option<String>,
    event_type: Option<EventType>,
    limit: usize,
) -> Result<()> {
    if !config.database.enabled {
        bail!("Persistence is disabled; no stored events to show");
    }

    let store = SqliteStore::open(&config.database)?;
    let query = EventQuery {
        camera_id: camera,
        event_type,
        limit,
        ..Default::default()
    };

    for event in store.query_events(&query).await? {
        println!("{}", serde_json::to_string(&event)?);
    }

    let stats = store.stats().await?;
    info!("{} event(s) stored in total", stats.total);
    Ok(())
}
