// =============================================================================
// tandem — KRX/NXT cross-venue tick arbitrage engine
// =============================================================================
//
// The engine starts in Paper mode for safety regardless of the saved config.
// Live order flow requires an explicit config edit and a linked broker
// bridge implementing `VenueClient`.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod clock;
mod config;
mod engine;
mod errors;
mod gateway;
mod halts;
mod journal;
mod market_data;
mod pair;
mod router;
mod session;
mod sim;
mod spread;
mod throttler;
mod types;
mod universe;
mod venue;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::{EngineConfig, RunMode};
use crate::engine::Engine;
use crate::journal::Journal;
use crate::sim::SimBroker;

const CONFIG_PATH_DEFAULT: &str = "tandem_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        tandem — KRX/NXT arbitrage engine                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("TANDEM_CONFIG").unwrap_or_else(|_| CONFIG_PATH_DEFAULT.into());
    let mut cfg = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // SAFETY: force Paper mode on startup. The real broker bridge is not
    // linked into this binary; flipping to Real requires both the config and
    // a bridge build.
    if cfg.app.mode == RunMode::Real {
        warn!("Real mode requested; forcing Paper (no broker bridge linked)");
    }
    cfg.app.mode = RunMode::Paper;

    info!(
        mode = %cfg.app.mode,
        overlap = %format!("{}-{}", cfg.sessions.overlap_start, cfg.sessions.overlap_end),
        batch_interval_ms = cfg.spread_engine.batch_interval_ms,
        orders_per_sec = cfg.throttling.orders_bucket_per_sec,
        "engine configuration"
    );

    // ── 2. Symbol universe ───────────────────────────────────────────────
    let universe_path =
        std::env::var("TANDEM_UNIVERSE").unwrap_or_else(|_| cfg.app.universe_path.clone());
    let symbols = match universe::load_universe(&universe_path) {
        Ok(symbols) if !symbols.is_empty() => symbols,
        Ok(_) => {
            warn!(path = %universe_path, "universe file is empty; using pilot symbols");
            pilot_symbols()
        }
        Err(e) => {
            warn!(path = %universe_path, error = %e, "failed to load universe; using pilot symbols");
            pilot_symbols()
        }
    };
    info!(symbols = symbols.len(), "trading universe ready");

    // ── 3. Execution journal ─────────────────────────────────────────────
    let journal = if cfg.app.journal_enabled {
        Journal::open(&cfg.app.log_dir).unwrap_or_else(|e| {
            error!(error = %e, "failed to open execution journal; continuing without");
            Journal::disabled()
        })
    } else {
        Journal::disabled()
    };

    // ── 4. Broker client & engine ────────────────────────────────────────
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let broker = SimBroker::new(tx);
    info!("paper broker attached (simulated fills)");

    let clock = Arc::new(SystemClock::new());
    let engine = Engine::new(cfg.clone(), clock, broker, symbols, journal);

    // ── 5. Run until shutdown ────────────────────────────────────────────
    let result = engine.run(rx).await;

    if let Err(e) = cfg.save(&config_path) {
        error!(error = %e, "failed to save config on shutdown");
    }
    info!("tandem shut down complete");
    result
}

/// Fallback universe when no file is configured: a handful of liquid
/// dual-listed names.
fn pilot_symbols() -> Vec<String> {
    ["005930", "000660", "035420", "051910", "068270"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
