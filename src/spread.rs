// =============================================================================
// Spread engine — micro-batched cross-venue opportunity detection
// =============================================================================
//
// Driven by a periodic tick (default 10 ms). Each sweep drains the quote
// book's dirty set, filters symbols still in cooldown, and evaluates both
// trade directions per symbol with fee-aware edge arithmetic. A symbol that
// produces no signal enters cooldown; a symbol that does produce one is kept
// out of re-entry downstream by the one-pair-per-symbol admission cap.
// =============================================================================

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{FeesConfig, SpreadConfig};
use crate::halts::HaltTracker;
use crate::market_data::{QuoteBook, QuoteSnapshot};
use crate::types::Venue;

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// An arbitrage opportunity: buy the cheap venue's ask, sell the rich
/// venue's bid. Created, consumed, and discarded within one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    /// Ask on the buy venue (KRW).
    pub buy_price: i64,
    /// Bid on the sell venue (KRW).
    pub sell_price: i64,
    /// Capped by the smaller visible side and the pilot limit.
    pub max_qty: u32,
    /// Per-share gross edge in KRW.
    pub gross_edge: f64,
    /// Per-share total fees in KRW.
    pub fee_cost: f64,
    /// Per-share net edge in KRW.
    pub net_edge: f64,
    pub edge_bps: f64,
    /// Monotonic ms at creation.
    pub ts_ms: u64,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Signal({}: {}@{} -> {}@{}, edge={:.1}bps)",
            self.symbol, self.buy_venue, self.buy_price, self.sell_venue, self.sell_price,
            self.edge_bps
        )
    }
}

/// Statistics for one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub sweep_id: u64,
    pub dirty: usize,
    pub eligible: usize,
    pub processed: usize,
    pub signals: usize,
    pub in_cooldown: usize,
    pub halted: usize,
    pub duration_ms: f64,
}

/// Cumulative engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SpreadStats {
    pub total_sweeps: u64,
    pub total_signals: u64,
    pub symbols_in_cooldown: usize,
    pub signals_per_sweep: f64,
}

// ---------------------------------------------------------------------------
// Korean tick table
// ---------------------------------------------------------------------------

/// Minimum price increment for `price`, per the standard tiered table.
pub fn tick_size(price: i64) -> i64 {
    match price {
        p if p < 2_000 => 1,
        p if p < 5_000 => 5,
        p if p < 20_000 => 10,
        p if p < 50_000 => 50,
        p if p < 200_000 => 100,
        p if p < 500_000 => 500,
        _ => 1_000,
    }
}

// ---------------------------------------------------------------------------
// Spread engine
// ---------------------------------------------------------------------------

pub struct SpreadEngine {
    batch_interval_ms: u64,
    min_net_ticks: i64,
    min_visible_qty: u32,
    cooldown_ms: u64,
    pilot_qty_cap: u32,

    krx_fee_bps: f64,
    nxt_fee_bps: f64,
    trade_tax_bps: f64,

    /// symbol -> earliest monotonic ms at which it may be re-evaluated.
    cooldowns: HashMap<String, u64>,
    sweep_id: u64,
    total_signals: u64,
}

impl SpreadEngine {
    pub fn new(cfg: &SpreadConfig, fees: &FeesConfig) -> Self {
        Self {
            batch_interval_ms: cfg.batch_interval_ms,
            min_net_ticks: cfg.min_net_ticks_after_fees,
            min_visible_qty: cfg.min_visible_qty,
            cooldown_ms: cfg.cooldown_ms,
            pilot_qty_cap: cfg.pilot_qty_cap,
            krx_fee_bps: fees.krx_broker_bps,
            nxt_fee_bps: fees.nxt_broker_bps + fees.nxt_regulatory_bps,
            trade_tax_bps: fees.trade_tax_bps,
            cooldowns: HashMap::new(),
            sweep_id: 0,
            total_signals: 0,
        }
    }

    /// Run one micro-batch: drain the dirty set, evaluate eligible symbols,
    /// and return any signals plus sweep statistics. When trading is not
    /// allowed the sweep is skipped entirely (the dirty set keeps
    /// accumulating). Halted symbols are passed over without entering
    /// cooldown; the halt gate is re-checked on their next update.
    pub fn sweep(
        &mut self,
        book: &mut QuoteBook,
        halts: &HaltTracker,
        can_trade: bool,
        now_ms: u64,
    ) -> (Vec<Signal>, Option<BatchStats>) {
        if !can_trade {
            return (Vec::new(), None);
        }

        let started = Instant::now();
        self.sweep_id += 1;

        let dirty = book.take_dirty_set();
        let dirty_count = dirty.len();

        // Cooldown filter; expired entries are removed as they are observed.
        let mut eligible: Vec<String> = Vec::with_capacity(dirty.len());
        for symbol in dirty {
            match self.cooldowns.get(&symbol) {
                Some(&until) if now_ms < until => {}
                _ => {
                    self.cooldowns.remove(&symbol);
                    eligible.push(symbol);
                }
            }
        }

        let mut signals = Vec::new();
        let mut processed = 0;
        let mut halted = 0;
        for symbol in &eligible {
            if halts.is_halted(symbol) {
                debug!(symbol = %symbol, "symbol halted; skipped");
                halted += 1;
                continue;
            }
            let Some(snap) = book.get(symbol) else {
                continue;
            };
            if !self.quote_valid(snap) {
                continue;
            }
            processed += 1;

            match self.best_direction(snap, now_ms) {
                Some(sig) if self.meets_threshold(snap, &sig) => {
                    debug!(signal = %sig, net = sig.net_edge, "signal generated");
                    self.total_signals += 1;
                    signals.push(sig);
                }
                _ => {
                    self.enter_cooldown(symbol, now_ms);
                }
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let in_cooldown = self
            .cooldowns
            .values()
            .filter(|&&until| until > now_ms)
            .count();

        if duration_ms > self.batch_interval_ms as f64 * 0.8 {
            warn!(
                duration_ms,
                budget_ms = self.batch_interval_ms,
                "slow sweep"
            );
        }

        let stats = BatchStats {
            sweep_id: self.sweep_id,
            dirty: dirty_count,
            eligible: eligible.len(),
            processed,
            signals: signals.len(),
            in_cooldown,
            halted,
            duration_ms,
        };

        (signals, Some(stats))
    }

    /// Both venues two-sided, uncrossed, and large enough on their thin side.
    fn quote_valid(&self, snap: &QuoteSnapshot) -> bool {
        let side_ok = |q: &crate::market_data::VenueQuote| {
            q.is_valid() && q.bid_size.min(q.ask_size) >= self.min_visible_qty
        };
        side_ok(&snap.krx) && side_ok(&snap.nxt)
    }

    /// Evaluate both directions and keep the better net edge; ties go to the
    /// direction with the cheaper buy ask.
    fn best_direction(&self, snap: &QuoteSnapshot, now_ms: u64) -> Option<Signal> {
        let buy_krx = self.direction_edge(snap, Venue::Krx, now_ms);
        let buy_nxt = self.direction_edge(snap, Venue::Nxt, now_ms);

        match (buy_krx, buy_nxt) {
            (Some(a), Some(b)) => {
                if a.net_edge > b.net_edge {
                    Some(a)
                } else if b.net_edge > a.net_edge {
                    Some(b)
                } else if a.buy_price <= b.buy_price {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (a, b) => a.or(b),
        }
    }

    /// Edge for the direction buying `buy_venue`'s ask and selling the other
    /// venue's bid. Requires the books to cross net of nothing; fee and
    /// threshold checks come later.
    fn direction_edge(&self, snap: &QuoteSnapshot, buy_venue: Venue, now_ms: u64) -> Option<Signal> {
        let sell_venue = buy_venue.other();
        let buy = snap.venue(buy_venue);
        let sell = snap.venue(sell_venue);

        let buy_price = buy.ask;
        let sell_price = sell.bid;
        if sell_price <= buy_price {
            return None;
        }

        let gross_edge = (sell_price - buy_price) as f64;
        let buy_fee = buy_price as f64 * self.venue_fee_bps(buy_venue) / 10_000.0;
        let sell_fee =
            sell_price as f64 * (self.venue_fee_bps(sell_venue) + self.trade_tax_bps) / 10_000.0;
        let fee_cost = buy_fee + sell_fee;
        let net_edge = gross_edge - fee_cost;
        let edge_bps = net_edge / buy_price as f64 * 10_000.0;

        let max_qty = buy.ask_size.min(sell.bid_size).min(self.pilot_qty_cap);

        Some(Signal {
            symbol: snap.symbol.clone(),
            buy_venue,
            sell_venue,
            buy_price,
            sell_price,
            max_qty,
            gross_edge,
            fee_cost,
            net_edge,
            edge_bps,
            ts_ms: now_ms,
        })
    }

    fn venue_fee_bps(&self, venue: Venue) -> f64 {
        match venue {
            Venue::Krx => self.krx_fee_bps,
            Venue::Nxt => self.nxt_fee_bps,
        }
    }

    /// Admission threshold: net edge must clear `min_net_ticks` ticks at the
    /// reference price, and be strictly positive.
    fn meets_threshold(&self, snap: &QuoteSnapshot, sig: &Signal) -> bool {
        let min_edge = (tick_size(self.reference_price(snap)) * self.min_net_ticks) as f64;
        sig.net_edge > 0.0 && sig.net_edge >= min_edge
    }

    /// Reference price for tick sizing: KRX mid when two-sided, else NXT mid,
    /// else whichever single side exists, else a mid-band default.
    fn reference_price(&self, snap: &QuoteSnapshot) -> i64 {
        if snap.krx.bid > 0 && snap.krx.ask > 0 {
            (snap.krx.bid + snap.krx.ask) / 2
        } else if snap.nxt.bid > 0 && snap.nxt.ask > 0 {
            (snap.nxt.bid + snap.nxt.ask) / 2
        } else if snap.krx.ask > 0 {
            snap.krx.ask
        } else if snap.krx.bid > 0 {
            snap.krx.bid
        } else if snap.nxt.ask > 0 {
            snap.nxt.ask
        } else if snap.nxt.bid > 0 {
            snap.nxt.bid
        } else {
            50_000
        }
    }

    fn enter_cooldown(&mut self, symbol: &str, now_ms: u64) {
        self.cooldowns
            .insert(symbol.to_string(), now_ms + self.cooldown_ms);
        debug!(symbol = %symbol, cooldown_ms = self.cooldown_ms, "symbol entered cooldown");
    }

    /// Operator override: drop all cooldowns.
    pub fn clear_cooldowns(&mut self) {
        let cleared = self.cooldowns.len();
        self.cooldowns.clear();
        debug!(cleared, "cooldowns cleared");
    }

    pub fn stats(&self, now_ms: u64) -> SpreadStats {
        SpreadStats {
            total_sweeps: self.sweep_id,
            total_signals: self.total_signals,
            symbols_in_cooldown: self
                .cooldowns
                .values()
                .filter(|&&until| until > now_ms)
                .count(),
            signals_per_sweep: self.total_signals as f64 / self.sweep_id.max(1) as f64,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
