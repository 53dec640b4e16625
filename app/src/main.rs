use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use core_types::{ClientId, InstrumentId, Tick};
use engine::{Engine, SquareOffScheduler};
use events::EngineEvent;
use execution::PaperGateway;
use feed::{ReplayFeed, StaticRegistry};
use rust_decimal::Decimal;
use serde::Deserialize;
use state_store::MemoryStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::prelude::*;

use self::tracing_layer::EventBroadcastLayer;
mod tracing_layer;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A multi-client intraday trading engine.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a paper trading session against a recorded tick script.
    Run {
        /// Path to the tick script replayed as the session's market data.
        #[arg(long, default_value = "config/ticks.toml")]
        ticks: PathBuf,

        /// Delay between replayed ticks, in milliseconds.
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// Loads and validates the configuration, then exits.
    CheckConfig,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    // --- Event Broadcast and Tracing Setup ---
    let (event_tx, _) = broadcast::channel::<EngineEvent>(1024);
    let event_layer = EventBroadcastLayer::new(event_tx.clone());
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new().with_default(tracing::Level::INFO),
    );
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(event_layer)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Meridian application");

    match cli.command {
        Commands::Run { ticks, pace_ms } => {
            run_session(event_tx, &ticks, pace_ms).await?;
        }
        Commands::CheckConfig => {
            check_config()?;
        }
    }

    tracing::info!("Meridian application has finished successfully.");

    Ok(())
}

async fn run_session(
    event_tx: broadcast::Sender<EngineEvent>,
    ticks_path: &Path,
    pace_ms: u64,
) -> Result<()> {
    let settings = app_config::load_settings()?;
    let roster = app_config::load_clients_config()?;

    let mut registry = StaticRegistry::new();
    for instrument in &roster.instruments {
        let day_open = Decimal::try_from(instrument.day_open)
            .with_context(|| format!("invalid day open for {}", instrument.symbol))?;
        registry.add_instrument(InstrumentId(instrument.symbol.clone()), day_open);
    }
    for client in roster.clients.iter().filter(|c| c.enabled) {
        for symbol in &client.watchlist {
            registry.watch(ClientId(client.id.clone()), InstrumentId(symbol.clone()));
        }
    }

    let feed = load_tick_script(ticks_path, Duration::from_millis(pace_ms))?;
    let gateway = Arc::new(PaperGateway::new(settings.paper.clone()));
    let store = Arc::new(MemoryStore::new());

    let engine = Engine::new(
        settings.clone(),
        roster,
        Arc::new(feed),
        Arc::new(registry),
        gateway,
        store,
        event_tx,
    )?;
    let handle = engine.handle();

    // Narrate domain events into the log stream.
    let mut events = handle.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                // Log events are already on their way to the terminal.
                Ok(EngineEvent::Log(_)) => {}
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "Engine event."),
                    Err(err) => {
                        tracing::warn!(error = %err, "Failed to serialize an engine event.");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let scheduler = SquareOffScheduler::new(settings.session.clone(), handle.clone());
    tokio::select! {
        result = engine.run() => result?,
        // The scheduler runs until the session itself ends.
        _ = scheduler.run() => {}
    }
    Ok(())
}

fn check_config() -> Result<()> {
    let settings = app_config::load_settings()?;
    let roster = app_config::load_clients_config()?;
    tracing::info!(
        environment = %settings.app.environment,
        clients = roster.clients.len(),
        instruments = roster.instruments.len(),
        square_off = %settings.session.square_off_time,
        "Configuration is valid."
    );
    Ok(())
}

// --- Tick Script Loading ---

#[derive(Deserialize, Debug)]
struct TickScript {
    ticks: Vec<TickRow>,
}

#[derive(Deserialize, Debug)]
struct TickRow {
    symbol: String,
    price: Decimal,
    at: DateTime<Utc>,
}

fn load_tick_script(path: &Path, pace: Duration) -> Result<ReplayFeed> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read tick script {}", path.display()))?;
    let script: TickScript =
        toml::from_str(&content).with_context(|| format!("malformed tick script {}", path.display()))?;

    let mut by_instrument: HashMap<InstrumentId, Vec<Tick>> = HashMap::new();
    for row in script.ticks {
        let instrument = InstrumentId(row.symbol);
        by_instrument.entry(instrument.clone()).or_default().push(Tick {
            instrument,
            price: row.price,
            timestamp: row.at,
        });
    }

    let mut feed = ReplayFeed::new(pace);
    for (instrument, ticks) in by_instrument {
        tracing::info!(instrument = %instrument, count = ticks.len(), "Tick script loaded.");
        feed.load(instrument, ticks);
    }
    Ok(feed)
}
