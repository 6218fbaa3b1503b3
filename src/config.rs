// =============================================================================
// Engine configuration — hot-loadable settings with atomic save
// =============================================================================
//
// Every tunable lives here, grouped the way the subsystems consume them.
// All fields carry serde defaults so that loading an older config file never
// breaks when new fields are added. Persistence uses a tmp + rename pattern
// to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_universe_path() -> String {
    "data/universe.csv".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_screen_pool() -> Vec<u16> {
    vec![101, 102, 103, 104]
}

fn default_order_screen() -> u16 {
    200
}

fn default_halt_screen() -> u16 {
    201
}

fn default_overlap_start() -> String {
    "09:00:32".to_string()
}

fn default_overlap_end() -> String {
    "15:19:50".to_string()
}

fn default_batch_interval_ms() -> u64 {
    10
}

fn default_min_net_ticks() -> i64 {
    1
}

fn default_min_visible_qty() -> u32 {
    1
}

fn default_cooldown_ms() -> u64 {
    100
}

fn default_pilot_qty_cap() -> u32 {
    10
}

fn default_t_hedge_ms() -> u64 {
    1000
}

fn default_ack_timeout_ms() -> u64 {
    200
}

fn default_accept_probe_ms() -> u64 {
    300
}

fn default_max_concurrent_symbols() -> usize {
    2
}

fn default_max_pairs_per_symbol() -> usize {
    1
}

fn default_orders_per_sec() -> f64 {
    5.0
}

fn default_queries_per_sec() -> f64 {
    5.0
}

fn default_reserve_order_tokens() -> f64 {
    2.0
}

fn default_min_tokens_free() -> f64 {
    4.0
}

fn default_autopause_threshold() -> f64 {
    0.80
}

fn default_autopause_sustain_secs() -> u32 {
    5
}

fn default_krx_broker_bps() -> f64 {
    1.5
}

fn default_nxt_broker_bps() -> f64 {
    1.45
}

// =============================================================================
// Sections
// =============================================================================

/// Whether the engine routes orders to a real broker bridge or to the
/// in-process simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Real,
    Paper,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            Self::Paper => write!(f, "Paper"),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Directory for the execution journal.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Whether the append-only execution journal is written.
    #[serde(default = "default_true")]
    pub journal_enabled: bool,
    /// Path to the symbol-universe CSV (first column = six-digit codes).
    #[serde(default = "default_universe_path")]
    pub universe_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Paper,
            log_dir: default_log_dir(),
            journal_enabled: true,
            universe_path: default_universe_path(),
        }
    }
}

/// Broker session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Trading account number, set after login.
    #[serde(default)]
    pub account: String,
    /// Screen numbers available for market-data shards.
    #[serde(default = "default_screen_pool")]
    pub screen_pool: Vec<u16>,
    /// Screen number used for order traffic.
    #[serde(default = "default_order_screen")]
    pub order_screen: u16,
    /// Screen number used for the volatility-interruption halt feed.
    #[serde(default = "default_halt_screen")]
    pub halt_screen: u16,
    /// Pop the account-password window during login.
    #[serde(default)]
    pub prompt_account_pw: bool,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            screen_pool: default_screen_pool(),
            order_screen: default_order_screen(),
            halt_screen: default_halt_screen(),
            prompt_account_pw: false,
        }
    }
}

/// Session admission window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Start of the KRX/NXT overlap window ("HH:MM:SS").
    #[serde(default = "default_overlap_start")]
    pub overlap_start: String,
    /// End of the overlap window ("HH:MM:SS").
    #[serde(default = "default_overlap_end")]
    pub overlap_end: String,
    /// Gate on the NXT session-phase signal (main-open code `R`) rather than
    /// the time-based fallback.
    #[serde(default = "default_true")]
    pub use_session_signal: bool,
    /// When false, the admission window checks are bypassed entirely
    /// (operator/testing override).
    #[serde(default = "default_true")]
    pub arm_only_in_overlap: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overlap_start: default_overlap_start(),
            overlap_end: default_overlap_end(),
            use_session_signal: true,
            arm_only_in_overlap: true,
        }
    }
}

/// Spread-engine sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadConfig {
    /// Micro-batch interval in milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Minimum net edge in ticks (after fees) for a signal.
    #[serde(default = "default_min_net_ticks")]
    pub min_net_ticks_after_fees: i64,
    /// Minimum visible size on every quoted side of both venues.
    #[serde(default = "default_min_visible_qty")]
    pub min_visible_qty: u32,
    /// Cooldown applied to a symbol after a no-signal evaluation.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Hard cap on per-signal quantity. Pilot deployments often clamp to 1.
    #[serde(default = "default_pilot_qty_cap")]
    pub pilot_qty_cap: u32,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            min_net_ticks_after_fees: default_min_net_ticks(),
            min_visible_qty: default_min_visible_qty(),
            cooldown_ms: default_cooldown_ms(),
            pilot_qty_cap: default_pilot_qty_cap(),
        }
    }
}

/// Execution and pair-lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// How long a posted hedge may rest before cancel + escalation.
    #[serde(default = "default_t_hedge_ms")]
    pub t_hedge_ms: u64,
    /// Deadline for the broker TR ack after a submit.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Diagnostic probe: how long after ack an order may sit with no
    /// execution report before it is flagged stuck.
    #[serde(default = "default_accept_probe_ms")]
    pub accept_probe_ms: u64,
    /// Maximum number of symbols with live pairs at once.
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,
    /// Maximum simultaneous pairs per symbol.
    #[serde(default = "default_max_pairs_per_symbol")]
    pub max_pairs_per_symbol: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            t_hedge_ms: default_t_hedge_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            accept_probe_ms: default_accept_probe_ms(),
            max_concurrent_symbols: default_max_concurrent_symbols(),
            max_pairs_per_symbol: default_max_pairs_per_symbol(),
        }
    }
}

/// Router order-type selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Allow the NXT mid-price type for hedge legs when the edge comfortably
    /// clears fees.
    #[serde(default = "default_true")]
    pub allow_nxt_mid: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { allow_nxt_mid: true }
    }
}

/// Broker rate-limit and auto-pause settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_orders_per_sec")]
    pub orders_bucket_per_sec: f64,
    #[serde(default = "default_queries_per_sec")]
    pub queries_bucket_per_sec: f64,
    /// Order tokens held back for urgent traffic (cancels, escalations).
    #[serde(default = "default_reserve_order_tokens")]
    pub reserve_order_tokens: f64,
    /// Free order tokens required before a new pair may be admitted.
    #[serde(default = "default_min_tokens_free")]
    pub min_tokens_free_to_start_new_pair: f64,
    /// Orders-bucket utilization at which auto-pause arms.
    #[serde(default = "default_autopause_threshold")]
    pub autopause_threshold: f64,
    /// Consecutive seconds at/above threshold before pause trips.
    #[serde(default = "default_autopause_sustain_secs")]
    pub autopause_sustain_secs: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            orders_bucket_per_sec: default_orders_per_sec(),
            queries_bucket_per_sec: default_queries_per_sec(),
            reserve_order_tokens: default_reserve_order_tokens(),
            min_tokens_free_to_start_new_pair: default_min_tokens_free(),
            autopause_threshold: default_autopause_threshold(),
            autopause_sustain_secs: default_autopause_sustain_secs(),
        }
    }
}

/// Per-venue fee schedule in basis points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    #[serde(default = "default_krx_broker_bps")]
    pub krx_broker_bps: f64,
    #[serde(default = "default_nxt_broker_bps")]
    pub nxt_broker_bps: f64,
    /// NXT regulatory levy, added to the NXT broker fee.
    #[serde(default)]
    pub nxt_regulatory_bps: f64,
    /// Transaction tax applied to sell executions, any venue. Zero for the
    /// tax-exempt instruments the pilot trades.
    #[serde(default)]
    pub trade_tax_bps: f64,
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            krx_broker_bps: default_krx_broker_bps(),
            nxt_broker_bps: default_nxt_broker_bps(),
            nxt_regulatory_bps: 0.0,
            trade_tax_bps: 0.0,
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub spread_engine: SpreadConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub throttling: ThrottleConfig,
    #[serde(default)]
    pub fees: FeesConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error if the file is missing or malformed so the caller can
    /// fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            mode = %config.app.mode,
            batch_interval_ms = config.spread_engine.batch_interval_ms,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
