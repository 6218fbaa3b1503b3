// =============================================================================
// Pair manager — drives a paired trade from signal to flat
// =============================================================================
//
// State machine per pair:
//
//   CANDIDATE -> ENTRY_TAKE_SENT -> ENTRY_TAKE_FILLED -> HEDGE_POST_PENDING
//     -> PAIRED_DONE                                  (hedge fills in time)
//     -> CANCEL_POST_SENT -> HEDGE_IOC_SENT -> PAIRED_DONE   (hedge timeout)
//   any step may fail into FAILED
//
// The take leg is never cancelled once sent; recovery always happens on the
// hedge side. Inventory per symbol is tracked from individual fills and must
// return to zero when a pair completes with matched quantities.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionConfig, FeesConfig};
use crate::gateway::{ExecutionEvent, ExecutionGateway};
use crate::router::{OrderIntent, Router};
use crate::session::SessionState;
use crate::spread::Signal;
use crate::throttler::Throttler;
use crate::types::Venue;

/// Terminal pairs linger this long to absorb late events.
const PAIR_GC_MS: u64 = 5_000;

/// How long to wait for a hedge-cancel confirmation before escalating anyway.
const CANCEL_CONFIRM_TIMEOUT_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Pair state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairState {
    Candidate,
    EntryTakeSent,
    EntryTakeFilled,
    HedgePostPending,
    CancelPostSent,
    HedgeIocSent,
    PairedDone,
    Failed,
}

impl PairState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PairedDone | Self::Failed)
    }
}

impl std::fmt::Display for PairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Candidate => "CANDIDATE",
            Self::EntryTakeSent => "ENTRY_TAKE_SENT",
            Self::EntryTakeFilled => "ENTRY_TAKE_FILLED",
            Self::HedgePostPending => "HEDGE_POST_PENDING",
            Self::CancelPostSent => "CANCEL_POST_SENT",
            Self::HedgeIocSent => "HEDGE_IOC_SENT",
            Self::PairedDone => "PAIRED_DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// One paired trade from admission to flat.
#[derive(Debug, Clone)]
pub struct PairTrade {
    pub id: u64,
    pub signal: Signal,
    pub state: PairState,
    hedge_intent: OrderIntent,
    take_order: Option<u64>,
    hedge_order: Option<u64>,
    pub take_filled: u32,
    pub hedge_filled: u32,
    take_notional: f64,
    hedge_notional: f64,
    /// Quantity the hedge was sized to (the observed take fill).
    hedge_qty: u32,
    unhedged_since: Option<u64>,
    /// Doubles as the cancel-confirmation deadline in CANCEL_POST_SENT.
    hedge_deadline: Option<u64>,
    cleanup_at: Option<u64>,
    pub realized: f64,
    pub profitable: bool,
}

/// Completion summary emitted when a pair goes flat.
#[derive(Debug, Clone, Serialize)]
pub struct PairCompletion {
    pub pair_id: u64,
    pub symbol: String,
    pub qty: u32,
    pub sell_vwap: f64,
    pub buy_vwap: f64,
    pub realized: f64,
    pub profitable: bool,
    pub qty_mismatch: bool,
}

// ---------------------------------------------------------------------------
// Pair manager
// ---------------------------------------------------------------------------

pub struct PairManager {
    t_hedge_ms: u64,
    max_concurrent_symbols: usize,
    max_pairs_per_symbol: usize,

    krx_fee_bps: f64,
    nxt_fee_bps: f64,
    trade_tax_bps: f64,

    next_pair_id: u64,
    pairs: HashMap<u64, PairTrade>,
    by_order: HashMap<u64, u64>,
    inventory: HashMap<String, i64>,

    pub completed_count: u64,
    pub failed_count: u64,
}

impl PairManager {
    pub fn new(exec: &ExecutionConfig, fees: &FeesConfig) -> Self {
        Self {
            t_hedge_ms: exec.t_hedge_ms,
            max_concurrent_symbols: exec.max_concurrent_symbols,
            max_pairs_per_symbol: exec.max_pairs_per_symbol,
            krx_fee_bps: fees.krx_broker_bps,
            nxt_fee_bps: fees.nxt_broker_bps + fees.nxt_regulatory_bps,
            trade_tax_bps: fees.trade_tax_bps,
            next_pair_id: 1,
            pairs: HashMap::new(),
            by_order: HashMap::new(),
            inventory: HashMap::new(),
            completed_count: 0,
            failed_count: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn active_pair_count(&self) -> usize {
        self.pairs.values().filter(|p| !p.state.is_terminal()).count()
    }

    fn active_symbol_count(&self) -> usize {
        let mut symbols: Vec<&str> = self
            .pairs
            .values()
            .filter(|p| !p.state.is_terminal())
            .map(|p| p.signal.symbol.as_str())
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols.len()
    }

    fn active_pairs_for(&self, symbol: &str) -> usize {
        self.pairs
            .values()
            .filter(|p| !p.state.is_terminal() && p.signal.symbol == symbol)
            .count()
    }

    fn has_active_pair_for(&self, symbol: &str) -> bool {
        self.active_pairs_for(symbol) > 0
    }

    /// Net signed position for `symbol`. Zero under correct operation once
    /// all pairs for the symbol are flat.
    pub fn inventory(&self, symbol: &str) -> i64 {
        self.inventory.get(symbol).copied().unwrap_or(0)
    }

    /// Symbols with residual inventory (a recovery condition if persistent).
    pub fn non_flat_symbols(&self) -> Vec<(String, i64)> {
        self.inventory
            .iter()
            .filter(|(_, &q)| q != 0)
            .map(|(s, &q)| (s.clone(), q))
            .collect()
    }

    pub fn pair(&self, pair_id: u64) -> Option<&PairTrade> {
        self.pairs.get(&pair_id)
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Try to turn a signal into a working pair. Denials at the admission
    /// gates drop the signal silently; a synchronous take-submit failure
    /// leaves a FAILED pair record behind.
    pub fn handle_signal(
        &mut self,
        signal: Signal,
        session: &mut SessionState,
        throttler: &mut Throttler,
        router: &Router,
        gateway: &mut ExecutionGateway,
        now_ms: u64,
    ) -> Option<u64> {
        if !session.can_open_new() {
            debug!(symbol = %signal.symbol, "signal dropped: session not open for new pairs");
            return None;
        }
        if !self.has_active_pair_for(&signal.symbol)
            && self.active_symbol_count() >= self.max_concurrent_symbols
        {
            debug!(symbol = %signal.symbol, "signal dropped: concurrent symbol cap");
            return None;
        }
        if self.active_pairs_for(&signal.symbol) >= self.max_pairs_per_symbol {
            debug!(symbol = %signal.symbol, "signal dropped: per-symbol pair cap");
            return None;
        }
        if !throttler.can_start_new_pair(now_ms) {
            debug!(symbol = %signal.symbol, "signal dropped: throttle headroom");
            return None;
        }

        let pair_id = self.next_pair_id;
        self.next_pair_id += 1;

        let (take_intent, hedge_intent) = router.build_pair(pair_id, &signal);
        let mut pair = PairTrade {
            id: pair_id,
            signal,
            state: PairState::Candidate,
            hedge_intent,
            take_order: None,
            hedge_order: None,
            take_filled: 0,
            hedge_filled: 0,
            take_notional: 0.0,
            hedge_notional: 0.0,
            hedge_qty: 0,
            unhedged_since: None,
            hedge_deadline: None,
            cleanup_at: None,
            realized: 0.0,
            profitable: false,
        };

        match gateway.send(take_intent, throttler, now_ms) {
            Ok(order_id) => {
                pair.take_order = Some(order_id);
                pair.state = PairState::EntryTakeSent;
                info!(
                    pair_id,
                    symbol = %pair.signal.symbol,
                    sell_venue = %pair.signal.sell_venue,
                    buy_venue = %pair.signal.buy_venue,
                    qty = pair.signal.max_qty,
                    net_edge = pair.signal.net_edge,
                    "pair admitted, take sent"
                );
                self.by_order.insert(order_id, pair_id);
                self.pairs.insert(pair_id, pair);
                session.note_pair_admitted();
                Some(pair_id)
            }
            Err(e) => {
                warn!(pair_id, error = %e, "take submit failed; pair failed");
                pair.state = PairState::Failed;
                pair.cleanup_at = Some(now_ms + PAIR_GC_MS);
                self.failed_count += 1;
                self.pairs.insert(pair_id, pair);
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Execution events
    // -------------------------------------------------------------------------

    /// Route a gateway event into the owning pair's state machine. Returns
    /// completion summaries for pairs that went flat on this event.
    pub fn on_execution_event(
        &mut self,
        ev: &ExecutionEvent,
        router: &Router,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) -> Vec<PairCompletion> {
        let Some(&pair_id) = self.by_order.get(&ev.client_order_id()) else {
            return Vec::new();
        };
        let Some(pair) = self.pairs.get(&pair_id) else {
            return Vec::new();
        };
        if pair.state.is_terminal() {
            debug!(pair_id, state = %pair.state, "event for terminal pair ignored");
            return Vec::new();
        }

        let order_id = ev.client_order_id();
        let is_take = self.pairs[&pair_id].take_order == Some(order_id);
        // After an escalation, lifecycle events from the replaced hedge order
        // can still trail in; only fills from it remain meaningful.
        let is_current_hedge = self.pairs[&pair_id].hedge_order == Some(order_id);

        let mut completions = Vec::new();
        match ev {
            ExecutionEvent::TradePartial {
                fill_qty,
                fill_price,
                ..
            }
            | ExecutionEvent::TradeFill {
                fill_qty,
                fill_price,
                ..
            } => {
                let is_final = matches!(ev, ExecutionEvent::TradeFill { .. });
                if is_take {
                    self.on_take_fill(
                        pair_id, *fill_qty, *fill_price, router, gateway, throttler, now_ms,
                    );
                } else if let Some(done) = self.on_hedge_fill(
                    pair_id, *fill_qty, *fill_price, is_final, now_ms,
                ) {
                    completions.push(done);
                }
            }
            ExecutionEvent::OrderRejected { reason, .. } => {
                if is_take {
                    self.fail_pair(pair_id, &format!("take rejected: {reason}"), now_ms);
                } else if is_current_hedge {
                    self.on_hedge_setback(
                        pair_id,
                        &format!("hedge rejected: {reason}"),
                        router,
                        gateway,
                        throttler,
                        now_ms,
                    );
                } else {
                    debug!(pair_id, order_id, "rejection from replaced hedge ignored");
                }
            }
            ExecutionEvent::OrderTimeout { kind, .. } => {
                if is_take {
                    self.fail_pair(pair_id, &format!("take timeout: {kind}"), now_ms);
                } else if is_current_hedge {
                    self.on_hedge_setback(
                        pair_id,
                        &format!("hedge timeout: {kind}"),
                        router,
                        gateway,
                        throttler,
                        now_ms,
                    );
                } else {
                    debug!(pair_id, order_id, "timeout from replaced hedge ignored");
                }
            }
            ExecutionEvent::OrderCancelled { .. } => {
                if is_take {
                    // IOC remainder cancel on the take leg; nothing to do.
                    debug!(pair_id, "take remainder cancelled");
                } else if !is_current_hedge {
                    debug!(pair_id, order_id, "cancel of replaced hedge ignored");
                } else if let Some(done) =
                    self.on_hedge_cancelled(pair_id, router, gateway, throttler, now_ms)
                {
                    completions.push(done);
                }
            }
            ExecutionEvent::OrderAck { .. }
            | ExecutionEvent::OrderAccepted { .. }
            | ExecutionEvent::OrderStuck { .. } => {
                // Informational; the pair FSM does not move on these.
            }
        }
        completions
    }

    /// A take-leg fill: book inventory, and on the first fill size + send the
    /// hedge.
    fn on_take_fill(
        &mut self,
        pair_id: u64,
        fill_qty: u32,
        fill_price: i64,
        router: &Router,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) {
        let first_fill;
        let hedge_intent;
        {
            let Some(pair) = self.pairs.get_mut(&pair_id) else {
                return;
            };
            pair.take_filled += fill_qty;
            pair.take_notional += fill_price as f64 * fill_qty as f64;
            // Take is always the sell leg.
            *self.inventory.entry(pair.signal.symbol.clone()).or_insert(0) -=
                fill_qty as i64;

            first_fill = pair.state == PairState::EntryTakeSent;
            if !first_fill {
                if pair.state != PairState::HedgePostPending
                    && pair.state != PairState::CancelPostSent
                    && pair.state != PairState::HedgeIocSent
                {
                    warn!(pair_id, state = %pair.state, "take fill in unexpected state");
                }
                return;
            }

            pair.state = PairState::EntryTakeFilled;
            pair.unhedged_since = Some(now_ms);
            pair.hedge_qty = pair.take_filled;
            let mut intent = pair.hedge_intent.clone();
            intent.qty = pair.take_filled;
            hedge_intent = intent;
        }

        match gateway.send(hedge_intent.clone(), throttler, now_ms) {
            Ok(order_id) => {
                self.by_order.insert(order_id, pair_id);
                if let Some(pair) = self.pairs.get_mut(&pair_id) {
                    pair.hedge_order = Some(order_id);
                    pair.state = PairState::HedgePostPending;
                    pair.hedge_deadline = Some(now_ms + self.t_hedge_ms);
                    info!(
                        pair_id,
                        hedge_order = order_id,
                        qty = pair.hedge_qty,
                        deadline_ms = self.t_hedge_ms,
                        "hedge posted"
                    );
                }
            }
            Err(e) => {
                // Position is on; skip straight to a marketable hedge.
                warn!(pair_id, error = %e, "hedge submit failed; escalating immediately");
                let esc = router.build_escalation(&hedge_intent, hedge_intent.qty);
                self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
            }
        }
    }

    /// A hedge-leg fill: book inventory; a final fill completes the pair.
    fn on_hedge_fill(
        &mut self,
        pair_id: u64,
        fill_qty: u32,
        fill_price: i64,
        is_final: bool,
        now_ms: u64,
    ) -> Option<PairCompletion> {
        {
            let pair = self.pairs.get_mut(&pair_id)?;
            pair.hedge_filled += fill_qty;
            pair.hedge_notional += fill_price as f64 * fill_qty as f64;
            *self.inventory.entry(pair.signal.symbol.clone()).or_insert(0) +=
                fill_qty as i64;
        }
        if is_final {
            self.complete_pair(pair_id, now_ms)
        } else {
            None
        }
    }

    /// Hedge rejection or ack-timeout. With a position on, escalate; if the
    /// escalation itself came back rejected, the pair fails with residual
    /// inventory surfaced.
    fn on_hedge_setback(
        &mut self,
        pair_id: u64,
        reason: &str,
        router: &Router,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) {
        let (state, take_filled, remainder, hedge_intent) = {
            let Some(pair) = self.pairs.get(&pair_id) else {
                return;
            };
            (
                pair.state,
                pair.take_filled,
                pair.hedge_qty.saturating_sub(pair.hedge_filled),
                pair.hedge_intent.clone(),
            )
        };

        if take_filled == 0 {
            self.fail_pair(pair_id, reason, now_ms);
            return;
        }
        match state {
            PairState::HedgePostPending | PairState::CancelPostSent => {
                warn!(pair_id, reason, "hedge setback with position on; escalating");
                let esc = router.build_escalation(&hedge_intent, remainder);
                self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
            }
            PairState::HedgeIocSent => {
                self.fail_pair(pair_id, &format!("escalation failed: {reason}"), now_ms);
            }
            _ => {
                warn!(pair_id, state = %state, reason, "hedge setback in unexpected state");
            }
        }
    }

    /// Hedge cancel confirmed: escalate the unfilled remainder, or complete
    /// if the hedge actually filled while the cancel was in flight.
    fn on_hedge_cancelled(
        &mut self,
        pair_id: u64,
        router: &Router,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) -> Option<PairCompletion> {
        let (state, remainder, hedge_intent) = {
            let pair = self.pairs.get(&pair_id)?;
            (
                pair.state,
                pair.hedge_qty.saturating_sub(pair.hedge_filled),
                pair.hedge_intent.clone(),
            )
        };

        match state {
            PairState::CancelPostSent => {
                if remainder == 0 {
                    return self.complete_pair(pair_id, now_ms);
                }
                let esc = router.build_escalation(&hedge_intent, remainder);
                self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
                None
            }
            PairState::HedgeIocSent => {
                // The IOC escalation expired unfilled; there is no further
                // automatic recovery.
                if remainder == 0 {
                    self.complete_pair(pair_id, now_ms)
                } else {
                    self.fail_pair(pair_id, "escalation expired unfilled", now_ms);
                    None
                }
            }
            PairState::HedgePostPending => {
                // Venue-side cancel (e.g. end of session) without our asking.
                warn!(pair_id, "hedge cancelled by venue; escalating");
                let esc = router.build_escalation(&hedge_intent, remainder);
                self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
                None
            }
            _ => {
                debug!(pair_id, state = %state, "hedge cancel in unexpected state ignored");
                None
            }
        }
    }

    fn submit_escalation(
        &mut self,
        pair_id: u64,
        esc: OrderIntent,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) {
        match gateway.send(esc, throttler, now_ms) {
            Ok(order_id) => {
                self.by_order.insert(order_id, pair_id);
                if let Some(pair) = self.pairs.get_mut(&pair_id) {
                    pair.hedge_order = Some(order_id);
                    pair.state = PairState::HedgeIocSent;
                    pair.hedge_deadline = None;
                    info!(pair_id, hedge_order = order_id, "hedge escalation sent");
                }
            }
            Err(e) => {
                error!(pair_id, error = %e, "hedge escalation submit failed; position unhedged");
                self.fail_pair(pair_id, "escalation submit failed", now_ms);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    /// Fire hedge deadlines and sweep terminal pairs. Called from the
    /// engine's periodic tick.
    pub fn poll_timers(
        &mut self,
        router: &Router,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) {
        let due: Vec<u64> = self
            .pairs
            .values()
            .filter(|p| {
                matches!(
                    p.state,
                    PairState::HedgePostPending | PairState::CancelPostSent
                ) && p.hedge_deadline.is_some_and(|d| now_ms >= d)
            })
            .map(|p| p.id)
            .collect();

        for pair_id in due {
            let (state, hedge_order, remainder, hedge_intent) = {
                let pair = &self.pairs[&pair_id];
                (
                    pair.state,
                    pair.hedge_order,
                    pair.hedge_qty.saturating_sub(pair.hedge_filled),
                    pair.hedge_intent.clone(),
                )
            };

            match state {
                PairState::HedgePostPending => {
                    let unhedged_ms = self.pairs[&pair_id]
                        .unhedged_since
                        .map(|t| now_ms.saturating_sub(t))
                        .unwrap_or(0);
                    warn!(pair_id, unhedged_ms, "hedge deadline; cancelling resting hedge");

                    let cancelled = hedge_order
                        .map(|id| gateway.cancel(id, throttler, now_ms))
                        .transpose();
                    match cancelled {
                        Ok(_) => {
                            if let Some(pair) = self.pairs.get_mut(&pair_id) {
                                pair.state = PairState::CancelPostSent;
                                pair.hedge_deadline =
                                    Some(now_ms + CANCEL_CONFIRM_TIMEOUT_MS);
                            }
                        }
                        Err(e) => {
                            // Cancel did not go out; go marketable directly.
                            warn!(pair_id, error = %e, "hedge cancel failed; escalating directly");
                            let esc = router.build_escalation(&hedge_intent, remainder);
                            self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
                        }
                    }
                }
                PairState::CancelPostSent => {
                    // No confirmation in time; escalate the remainder anyway.
                    warn!(pair_id, "cancel confirmation timeout; escalating");
                    let esc = router.build_escalation(&hedge_intent, remainder);
                    self.submit_escalation(pair_id, esc, gateway, throttler, now_ms);
                }
                _ => {}
            }
        }

        // Sweep terminal pairs past their grace window.
        let expired: Vec<u64> = self
            .pairs
            .values()
            .filter(|p| p.cleanup_at.is_some_and(|at| now_ms >= at))
            .map(|p| p.id)
            .collect();
        for pair_id in expired {
            if let Some(pair) = self.pairs.remove(&pair_id) {
                self.by_order.retain(|_, &mut pid| pid != pair_id);
                debug!(pair_id, state = %pair.state, "pair record swept");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Force close
    // -------------------------------------------------------------------------

    /// Operator-level close-out: cancel all working hedge orders and mark
    /// every outstanding pair FAILED. The take leg is never cancelled.
    pub fn force_close_all(
        &mut self,
        gateway: &mut ExecutionGateway,
        throttler: &mut Throttler,
        now_ms: u64,
    ) {
        let open: Vec<(u64, Option<u64>, PairState)> = self
            .pairs
            .values()
            .filter(|p| !p.state.is_terminal())
            .map(|p| (p.id, p.hedge_order, p.state))
            .collect();

        for (pair_id, hedge_order, state) in open {
            if state == PairState::HedgePostPending {
                if let Some(order_id) = hedge_order {
                    if let Err(e) = gateway.cancel(order_id, throttler, now_ms) {
                        warn!(pair_id, error = %e, "force-close hedge cancel failed");
                    }
                }
            }
            self.fail_pair(pair_id, "force close", now_ms);
        }
    }

    // -------------------------------------------------------------------------
    // Terminal transitions
    // -------------------------------------------------------------------------

    fn fail_pair(&mut self, pair_id: u64, reason: &str, now_ms: u64) {
        if let Some(pair) = self.pairs.get_mut(&pair_id) {
            if pair.state.is_terminal() {
                return;
            }
            warn!(
                pair_id,
                symbol = %pair.signal.symbol,
                from = %pair.state,
                reason,
                take_filled = pair.take_filled,
                hedge_filled = pair.hedge_filled,
                "pair failed"
            );
            pair.state = PairState::Failed;
            pair.cleanup_at = Some(now_ms + PAIR_GC_MS);
            self.failed_count += 1;
        }
    }

    /// Compute realized economics from actual VWAPs and retire the pair.
    fn complete_pair(&mut self, pair_id: u64, now_ms: u64) -> Option<PairCompletion> {
        let pair = self.pairs.get_mut(&pair_id)?;
        if pair.state.is_terminal() {
            return None;
        }

        let qty = pair.take_filled.min(pair.hedge_filled);
        let qty_mismatch = pair.take_filled != pair.hedge_filled;
        if qty_mismatch {
            warn!(
                pair_id,
                take_filled = pair.take_filled,
                hedge_filled = pair.hedge_filled,
                "pair quantity mismatch"
            );
        }

        let sell_vwap = pair.take_notional / pair.take_filled.max(1) as f64;
        let buy_vwap = pair.hedge_notional / pair.hedge_filled.max(1) as f64;
        let buy_venue = pair.signal.buy_venue;
        let sell_venue = pair.signal.sell_venue;

        let buy_bps = match buy_venue {
            Venue::Krx => self.krx_fee_bps,
            Venue::Nxt => self.nxt_fee_bps,
        };
        let sell_bps = match sell_venue {
            Venue::Krx => self.krx_fee_bps,
            Venue::Nxt => self.nxt_fee_bps,
        } + self.trade_tax_bps;
        let fee_per_share = buy_vwap * buy_bps / 10_000.0 + sell_vwap * sell_bps / 10_000.0;

        let realized = (sell_vwap - buy_vwap - fee_per_share) * qty as f64;
        pair.realized = realized;
        pair.profitable = realized > 0.0;
        pair.state = PairState::PairedDone;
        pair.cleanup_at = Some(now_ms + PAIR_GC_MS);
        self.completed_count += 1;

        info!(
            pair_id,
            symbol = %pair.signal.symbol,
            qty,
            sell_vwap,
            buy_vwap,
            realized,
            profitable = pair.profitable,
            qty_mismatch,
            "pair completed"
        );

        Some(PairCompletion {
            pair_id,
            symbol: pair.signal.symbol.clone(),
            qty,
            sell_vwap,
            buy_vwap,
            realized,
            profitable: pair.profitable,
            qty_mismatch,
        })
    }

    fn venue_fee_bps(&self, venue: Venue) -> f64 {
        match venue {
            Venue::Krx => self.krx_fee_bps,
            Venue::Nxt => self.nxt_fee_bps,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests (admission gates; the full FSM is exercised end-to-end in engine.rs)
// ---------------------------------------------------------------------------
