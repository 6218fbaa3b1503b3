// =============================================================================
// Engine — single-task cooperative event loop
// =============================================================================
//
// Owns every component and mediates between them; nothing else holds mutable
// state. Three event sources drive the loop:
//
//   1. Venue events (quotes, acks, execution reports, session phases).
//   2. The micro-batch sweep tick (default 10 ms), which also fires all
//      per-order and per-pair deadline timers.
//   3. A 1 s tick for session admission and throttle utilization sampling.
//
// All handlers are synchronous; the loop only yields between events.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::gateway::{ExecutionEvent, ExecutionGateway};
use crate::halts::HaltTracker;
use crate::journal::{Journal, JournalRow};
use crate::market_data::QuoteBook;
use crate::pair::PairManager;
use crate::router::Router;
use crate::session::{SessionState, TradingState};
use crate::spread::SpreadEngine;
use crate::throttler::Throttler;
use crate::venue::{fid, VenueClient, VenueEvent};

pub struct Engine {
    cfg: EngineConfig,
    clock: SharedClock,
    venue: Arc<dyn VenueClient>,
    journal: Journal,

    pub book: QuoteBook,
    pub session: SessionState,
    pub throttler: Throttler,
    pub spread: SpreadEngine,
    pub router: Router,
    pub gateway: ExecutionGateway,
    pub pairs: PairManager,
    pub halts: HaltTracker,

    seconds: u64,
}

/// Interval between periodic status log lines, in seconds.
const STATS_LOG_EVERY_SECS: u64 = 30;

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        clock: SharedClock,
        venue: Arc<dyn VenueClient>,
        symbols: Vec<String>,
        journal: Journal,
    ) -> Self {
        let mut book = QuoteBook::new();
        book.load_universe(&symbols, &cfg.venue.screen_pool);

        let session = SessionState::new(&cfg.sessions);
        let throttler = Throttler::new(&cfg.throttling);
        let spread = SpreadEngine::new(&cfg.spread_engine, &cfg.fees);
        let router = Router::new(&cfg.router);
        let gateway = ExecutionGateway::new(
            venue.clone(),
            cfg.venue.account.clone(),
            cfg.venue.order_screen,
            cfg.execution.ack_timeout_ms,
            cfg.execution.accept_probe_ms,
        );
        let pairs = PairManager::new(&cfg.execution, &cfg.fees);

        Self {
            cfg,
            clock,
            venue,
            journal,
            book,
            session,
            throttler,
            spread,
            router,
            gateway,
            pairs,
            halts: HaltTracker::new(),
            seconds: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Register quote subscriptions for every shard, pacing registrations
    /// through the query bucket (the broker rate-limits those too), then
    /// request the initial volatility-interruption halt list.
    pub async fn subscribe_universe(&mut self) {
        let shards = self.book.shards().to_vec();
        for shard in &shards {
            self.acquire_query_token().await;
            self.book.subscribe_shard(shard, self.venue.as_ref());
        }
        info!(shards = shards.len(), "quote subscriptions registered");

        self.acquire_query_token().await;
        if let Err(e) = self.venue.request_halt_list(self.cfg.venue.halt_screen) {
            warn!(error = %e, "halt list request failed; trading without halt snapshot");
        }
    }

    async fn acquire_query_token(&mut self) {
        loop {
            let now = self.clock.now_ms();
            if self.throttler.acquire_query(now).is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    // -------------------------------------------------------------------------
    // Event handlers
    // -------------------------------------------------------------------------

    pub fn on_venue_event(&mut self, ev: VenueEvent) {
        let now = self.clock.now_ms();
        match ev {
            VenueEvent::SessionConnect { err } => {
                if err == 0 {
                    info!("venue session connected");
                } else {
                    warn!(err, "venue session connect error");
                }
            }
            VenueEvent::Quote { code, fields } => {
                // NXT real data can carry the session phase alongside quotes.
                if let Some(raw) = fields.get(&fid::SESSION_PHASE) {
                    if let Some(c) = raw.trim().chars().next() {
                        self.session.on_session_phase(c);
                    }
                }
                self.book.apply_update(&code, &fields, now);
            }
            VenueEvent::SessionPhase { code } => {
                self.session.on_session_phase(code);
            }
            VenueEvent::HaltSnapshot { codes } => {
                self.halts.apply_snapshot(&codes);
            }
            VenueEvent::Halt { code, halted } => {
                self.halts.apply_event(&code, halted);
            }
            VenueEvent::TrData {
                screen,
                rq_name,
                tr_code,
                broker_order_id,
            } => {
                self.gateway
                    .on_tr_data(&screen, &rq_name, &tr_code, &broker_order_id, now);
                self.process_execution_events(now);
            }
            VenueEvent::Chejan { gubun, fields } => {
                self.gateway.on_chejan(&gubun, &fields, now);
                self.process_execution_events(now);
            }
            VenueEvent::Message {
                screen,
                rq_name,
                tr_code,
                msg,
            } => {
                self.gateway.on_message(&screen, &rq_name, &tr_code, &msg, now);
                self.process_execution_events(now);
            }
        }
    }

    /// The micro-batch tick: deliver due simulator events, fire deadline
    /// timers, then sweep for opportunities.
    pub fn on_sweep_tick(&mut self) {
        let now = self.clock.now_ms();
        self.venue.poll(now);

        self.gateway.poll_timers(now);
        self.process_execution_events(now);

        self.pairs
            .poll_timers(&self.router, &mut self.gateway, &mut self.throttler, now);
        self.process_execution_events(now);

        let can_trade = self.session.can_trade();
        let (signals, stats) = self
            .spread
            .sweep(&mut self.book, &self.halts, can_trade, now);
        for signal in signals {
            self.pairs.handle_signal(
                signal,
                &mut self.session,
                &mut self.throttler,
                &self.router,
                &mut self.gateway,
                now,
            );
        }
        self.process_execution_events(now);

        if let Some(stats) = stats {
            if stats.signals > 0 {
                debug!(
                    sweep_id = stats.sweep_id,
                    dirty = stats.dirty,
                    eligible = stats.eligible,
                    signals = stats.signals,
                    duration_ms = stats.duration_ms,
                    "sweep produced signals"
                );
            }
        }
    }

    /// The 1 s tick: utilization sampling, session admission, periodic stats.
    pub fn on_second_tick(&mut self) {
        let now = self.clock.now_ms();
        self.throttler.sample_utilization(now);

        let active = self.pairs.active_pair_count();
        if let Some(new_state) = self.session.tick(self.clock.wall_time(), active) {
            if new_state == TradingState::Disarmed {
                for (symbol, qty) in self.pairs.non_flat_symbols() {
                    warn!(symbol = %symbol, qty, "residual inventory at disarm");
                }
            }
        }

        self.seconds += 1;
        if self.seconds % STATS_LOG_EVERY_SECS == 0 {
            let session = self.session.info(self.clock.wall_time());
            let sweeps = self.spread.stats(now);
            let throttle = self.throttler.snapshot();
            info!(
                session = ?session,
                symbols = self.book.symbol_count(),
                ready = self.book.ready_count(now),
                sweeps = sweeps.total_sweeps,
                signals = sweeps.total_signals,
                in_cooldown = sweeps.symbols_in_cooldown,
                halted = self.halts.halted_count(),
                order_tokens = throttle.order_tokens,
                paused = throttle.paused,
                active_pairs = active,
                completed = self.pairs.completed_count,
                failed = self.pairs.failed_count,
                "engine status"
            );
        }
    }

    /// Operator emergency stop: cancel working hedges, fail outstanding
    /// pairs, and disarm.
    pub fn force_disarm(&mut self) {
        let now = self.clock.now_ms();
        warn!("force disarm requested");
        self.pairs
            .force_close_all(&mut self.gateway, &mut self.throttler, now);
        self.process_execution_events(now);
        self.spread.clear_cooldowns();
        self.session.force_disarm();
    }

    // -------------------------------------------------------------------------
    // Execution-event routing
    // -------------------------------------------------------------------------

    /// Drain gateway events into the journal and the pair FSM. Handling an
    /// event can produce follow-up orders (hedge, escalation) whose own
    /// synchronous rejections surface as new events, so drain to fixpoint.
    fn process_execution_events(&mut self, now_ms: u64) {
        loop {
            let events = self.gateway.drain_events();
            if events.is_empty() {
                break;
            }
            for ev in events {
                self.journal_execution_event(&ev);
                let completions = self.pairs.on_execution_event(
                    &ev,
                    &self.router,
                    &mut self.gateway,
                    &mut self.throttler,
                    now_ms,
                );
                for done in completions {
                    self.journal.record(JournalRow {
                        event: "PAIR_DONE",
                        pair_id: Some(done.pair_id),
                        symbol: &done.symbol,
                        qty: Some(done.qty),
                        detail: format!(
                            "sell_vwap={:.1} buy_vwap={:.1} realized={:.1} profitable={} mismatch={}",
                            done.sell_vwap,
                            done.buy_vwap,
                            done.realized,
                            done.profitable,
                            done.qty_mismatch
                        ),
                        ..Default::default()
                    });
                }
            }
        }
    }

    fn journal_execution_event(&mut self, ev: &ExecutionEvent) {
        let id = ev.client_order_id();
        let (name, detail) = match ev {
            ExecutionEvent::OrderAck {
                broker_order_id,
                latency_ms,
                ..
            } => (
                "ORDER_ACK",
                format!("broker={broker_order_id} latency_ms={latency_ms}"),
            ),
            ExecutionEvent::OrderAccepted { .. } => ("ORDER_ACCEPTED", String::new()),
            ExecutionEvent::OrderRejected { reason, .. } => ("ORDER_REJECTED", reason.clone()),
            ExecutionEvent::TradePartial {
                fill_qty,
                fill_price,
                remaining_qty,
                ..
            } => (
                "TRADE_PARTIAL",
                format!("fill={fill_qty}@{fill_price} rem={remaining_qty}"),
            ),
            ExecutionEvent::TradeFill {
                fill_qty,
                fill_price,
                vwap,
                ..
            } => (
                "TRADE_FILL",
                format!("fill={fill_qty}@{fill_price} vwap={vwap:.1}"),
            ),
            ExecutionEvent::OrderCancelled { .. } => ("ORDER_CANCELLED", String::new()),
            ExecutionEvent::OrderTimeout { kind, .. } => {
                ("ORDER_TIMEOUT", format!("timeout_type={kind}"))
            }
            ExecutionEvent::OrderStuck { .. } => ("ORDER_STUCK", String::new()),
        };

        let record = self.gateway.record(id);
        let pair_id = record.map(|r| r.intent.pair_id);
        let symbol = record.map(|r| r.intent.symbol.clone()).unwrap_or_default();
        let venue = record.map(|r| r.intent.venue.to_string()).unwrap_or_default();
        let side = record.map(|r| r.intent.side.to_string()).unwrap_or_default();
        let qty = record.map(|r| r.intent.qty);
        let price = record.map(|r| r.intent.price);

        self.journal.record(JournalRow {
            event: name,
            pair_id,
            client_order_id: Some(id),
            symbol: &symbol,
            venue: &venue,
            side: &side,
            qty,
            price,
            detail,
        });
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run(mut self, mut rx: UnboundedReceiver<VenueEvent>) -> Result<()> {
        if !self.venue.login(self.cfg.venue.prompt_account_pw) {
            anyhow::bail!("venue login failed");
        }
        self.subscribe_universe().await;

        let mut sweep = tokio::time::interval(Duration::from_millis(
            self.cfg.spread_engine.batch_interval_ms.max(1),
        ));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut secondly = tokio::time::interval(Duration::from_secs(1));

        info!("engine event loop running");
        loop {
            tokio::select! {
                Some(ev) = rx.recv() => self.on_venue_event(ev),
                _ = sweep.tick() => self.on_sweep_tick(),
                _ = secondly.tick() => self.on_second_tick(),
                _ = tokio::signal::ctrl_c() => {
                    warn!("shutdown signal received");
                    self.force_disarm();
                    break;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// End-to-end scenario tests (simulated broker + simulated clock)
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SimClock};
    use crate::config::EngineConfig;
    use crate::pair::PairState;
    use crate::sim::{OrderScript, SimBroker};
    use crate::types::Priority;
    use chrono::NaiveTime;
    use tokio::sync::mpsc::unbounded_channel;

    struct Harness {
        engine: Engine,
        rx: UnboundedReceiver<VenueEvent>,
        clock: Arc<SimClock>,
        broker: Arc<SimBroker>,
    }

    fn harness_with(cfg: EngineConfig) -> Harness {
        let clock = Arc::new(SimClock::new());
        let (tx, rx) = unbounded_channel();
        let broker = SimBroker::new(tx);
        let engine = Engine::new(
            cfg,
            clock.clone(),
            broker.clone(),
            vec!["005930".into(), "000660".into()],
            Journal::disabled(),
        );
        Harness {
            engine,
            rx,
            clock,
            broker,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default())
    }

    impl Harness {
        fn drain(&mut self) {
            while let Ok(ev) = self.rx.try_recv() {
                self.engine.on_venue_event(ev);
            }
        }

        /// Arm the session: main-open phase signal + one admission tick.
        fn arm(&mut self) {
            self.broker.push_session_phase('R');
            self.drain();
            self.engine.on_second_tick();
            assert!(self.engine.session.can_open_new());
        }

        /// Advance time in 10 ms quanta, running sweep ticks and delivering
        /// simulator events; second ticks fire on 1000 ms boundaries.
        fn step(&mut self, ms: u64) {
            for _ in 0..ms / 10 {
                self.clock.advance(10);
                self.engine.on_sweep_tick();
                self.drain();
                if self.clock.now_ms() % 1_000 == 0 {
                    self.engine.on_second_tick();
                }
            }
        }

        /// KRX 72000/72100 x100, NXT 72300/72400 x50: crossed, sell NXT.
        fn push_crossed_quotes(&mut self) {
            self.broker.push_quote("005930", 72_000, 72_100, 100, 100);
            self.broker.push_quote("005930_NX", 72_300, 72_400, 50, 50);
            self.drain();
        }
    }

    #[test]
    fn clean_pair_runs_to_paired_done() {
        let mut h = harness();
        h.arm();

        // Take: MARKET_IOC sell on NXT fills at the signalled bid; hedge:
        // LIMIT buy on KRX fills at its limit price.
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: None,
        });

        h.push_crossed_quotes();
        h.step(400);

        let subs = h.broker.submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].code, "005930_NX");
        assert_eq!(subs[0].hoga, "13"); // MARKET_IOC take
        assert_eq!(subs[0].price, 0);
        assert_eq!(subs[1].code, "005930");
        assert_eq!(subs[1].hoga, "00"); // LIMIT hedge
        assert_eq!(subs[1].price, 72_100);
        assert_eq!(subs[1].qty, 10);

        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::PairedDone);
        assert_eq!(pair.take_filled, 10);
        assert_eq!(pair.hedge_filled, 10);
        assert!(pair.profitable);

        // realized = (72300 - 72100 - fees) * 10 with fees on actual VWAPs.
        let fees = 72_100.0 * 1.5 / 10_000.0 + 72_300.0 * 1.45 / 10_000.0;
        let expected = (200.0 - fees) * 10.0;
        assert!((pair.realized - expected).abs() < 1e-6);

        // The pair ends flat.
        assert_eq!(h.engine.pairs.inventory("005930"), 0);
        assert_eq!(h.engine.pairs.completed_count, 1);
    }

    #[test]
    fn sub_threshold_spread_produces_no_pair() {
        let mut h = harness();
        h.arm();

        // Gross 10 KRW on a one-tick-100 name: net is negative.
        h.broker.push_quote("005930", 72_000, 72_100, 100, 100);
        h.broker.push_quote("005930_NX", 72_110, 72_210, 50, 50);
        h.drain();
        h.step(200);

        assert!(h.broker.submissions().is_empty());
        assert_eq!(h.engine.pairs.active_pair_count(), 0);
    }

    #[test]
    fn hedge_timeout_cancels_and_escalates() {
        let mut h = harness();
        h.arm();

        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        // Hedge rests unfilled until the deadline.
        h.broker.push_script(OrderScript::AcceptOnly { ack_delay_ms: 50 });
        // Escalation IOC fills with slippage.
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_120),
        });

        h.push_crossed_quotes();
        h.step(1_600);

        let subs = h.broker.submissions();
        // take, hedge, hedge cancel, escalation
        assert_eq!(subs.len(), 4);
        assert!(subs[2].rq_name.starts_with("CXL_"));
        assert_eq!(subs[3].hoga, "13"); // MARKET_IOC escalation
        assert_eq!(subs[3].qty, 10);

        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::PairedDone);

        // realized = (72300 - 72120 - fees) * 10, fees on actual VWAPs.
        let fees = 72_120.0 * 1.5 / 10_000.0 + 72_300.0 * 1.45 / 10_000.0;
        let expected = (180.0 - fees) * 10.0;
        assert!((pair.realized - expected).abs() < 1e-6);
        assert!(pair.profitable);
        assert_eq!(h.engine.pairs.inventory("005930"), 0);
    }

    #[test]
    fn take_rejection_fails_pair_without_hedge() {
        let mut h = harness();
        h.arm();

        h.broker.push_script(OrderScript::RejectMessage {
            delay_ms: 50,
            msg: "주문 거부: insufficient_balance".into(),
        });

        h.push_crossed_quotes();
        h.step(200);

        // Only the take went out; no hedge was attempted.
        assert_eq!(h.broker.submissions().len(), 1);
        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::Failed);
        assert_eq!(pair.take_filled, 0);
        assert_eq!(h.engine.pairs.inventory("005930"), 0);
        assert_eq!(h.engine.pairs.failed_count, 1);
    }

    #[test]
    fn take_ack_timeout_fails_pair() {
        let mut h = harness();
        h.arm();

        h.broker.push_script(OrderScript::Silent);
        h.push_crossed_quotes();
        h.step(300); // ack timeout at 200 ms

        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::Failed);
        assert_eq!(h.engine.pairs.inventory("005930"), 0);
    }

    #[test]
    fn auto_pause_blocks_new_pairs_until_released() {
        let mut h = harness();
        h.arm();

        // Trip the pause: drain the bucket and sample hot five times.
        for _ in 0..5 {
            let now = h.clock.now_ms();
            while h.engine.throttler.acquire_order(Priority::Urgent, now).is_ok() {}
            h.engine.throttler.sample_utilization(now);
            h.clock.advance(1_000);
        }
        assert!(h.engine.throttler.is_paused());

        // URGENT still flows while paused.
        let now = h.clock.now_ms();
        assert!(h.engine.throttler.acquire_order(Priority::Urgent, now).is_ok());

        // A fresh signal is denied admission.
        h.push_crossed_quotes();
        h.step(20);
        assert_eq!(h.engine.pairs.active_pair_count(), 0);
        assert!(h.broker.submissions().is_empty());

        // First cool sample releases; the next signal is admitted.
        h.engine.throttler.sample_utilization(h.clock.now_ms() + 1_000);
        assert!(!h.engine.throttler.is_paused());

        h.broker.push_quote("005930", 72_010, 72_100, 100, 100);
        h.drain();
        h.step(20);
        assert_eq!(h.engine.pairs.active_pair_count(), 1);
    }

    #[test]
    fn hedge_escalation_succeeds_while_paused() {
        let mut h = harness();
        h.arm();

        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::AcceptOnly { ack_delay_ms: 50 });
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_120),
        });

        h.push_crossed_quotes();
        h.step(200); // hedge posted, resting

        // Trip the pause while the hedge rests.
        for _ in 0..5 {
            let now = h.clock.now_ms();
            while h.engine.throttler.acquire_order(Priority::Urgent, now).is_ok() {}
            h.engine.throttler.sample_utilization(now);
            h.clock.advance(1_000);
        }
        assert!(h.engine.throttler.is_paused());

        // The hedge deadline fires next sweep: cancel + escalation are both
        // URGENT and go through despite the pause.
        h.step(400);
        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::PairedDone);
        assert!(h.engine.throttler.is_paused());
        assert_eq!(h.engine.pairs.inventory("005930"), 0);
    }

    #[test]
    fn session_close_mid_flight_drains_then_disarms() {
        let mut h = harness();
        h.clock.set_wall(NaiveTime::from_hms_opt(15, 19, 40).unwrap());
        h.arm();

        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::AcceptOnly { ack_delay_ms: 50 });
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_120),
        });

        h.push_crossed_quotes();
        h.step(200); // pair in HEDGE_POST_PENDING

        // The overlap window closes mid-pair.
        h.clock.set_wall(NaiveTime::from_hms_opt(15, 19, 51).unwrap());
        h.engine.on_second_tick();
        assert_eq!(h.engine.session.state(), TradingState::Closing);

        // No new admits: a fresh crossed book on another symbol is ignored.
        h.broker.push_quote("000660", 100_000, 100_100, 100, 100);
        h.broker.push_quote("000660_NX", 100_400, 100_500, 50, 50);
        h.drain();
        h.step(20);
        assert_eq!(h.engine.pairs.active_pair_count(), 1);

        // The existing pair escalates at its deadline and completes.
        h.step(1_400);
        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::PairedDone);

        // With the book flat, the next tick disarms.
        h.engine.on_second_tick();
        assert_eq!(h.engine.session.state(), TradingState::Disarmed);
    }

    #[test]
    fn partial_take_sizes_hedge_and_surfaces_mismatch() {
        let mut h = harness();
        h.arm();

        // Take fills 4 then 6; the hedge is sized to the first observed fill.
        h.broker.push_script(OrderScript::PartialThenFill {
            ack_delay_ms: 50,
            first_qty: 4,
            first_delay_ms: 100,
            final_delay_ms: 200,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: None,
        });

        h.push_crossed_quotes();
        h.step(500);

        let subs = h.broker.submissions();
        assert_eq!(subs[1].qty, 4); // hedge sized to the partial

        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::PairedDone);
        assert_eq!(pair.take_filled, 10);
        assert_eq!(pair.hedge_filled, 4);
        // Residual short inventory is surfaced, not hidden.
        assert_eq!(h.engine.pairs.inventory("005930"), -6);
    }

    #[test]
    fn per_symbol_and_concurrency_caps_hold() {
        let mut cfg = EngineConfig::default();
        cfg.execution.max_concurrent_symbols = 1;
        let mut h = harness_with(cfg);
        h.arm();

        // Hold both pairs open (hedges rest) so caps stay engaged.
        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::AcceptOnly { ack_delay_ms: 50 });

        h.push_crossed_quotes();
        // Crossed book on the second symbol too.
        h.broker.push_quote("000660", 100_000, 100_100, 100, 100);
        h.broker.push_quote("000660_NX", 100_400, 100_500, 50, 50);
        h.drain();
        h.step(200);

        // Only one symbol was admitted.
        assert_eq!(h.engine.pairs.active_pair_count(), 1);

        // Re-dirtying the admitted symbol does not open a second pair there
        // either (per-symbol cap).
        h.broker.push_quote("005930", 72_010, 72_100, 100, 100);
        h.drain();
        h.step(20);
        assert_eq!(h.engine.pairs.active_pair_count(), 1);
    }

    #[test]
    fn force_disarm_cancels_hedges_and_fails_pairs() {
        let mut h = harness();
        h.arm();

        h.broker.push_script(OrderScript::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: Some(72_300),
        });
        h.broker.push_script(OrderScript::AcceptOnly { ack_delay_ms: 50 });

        h.push_crossed_quotes();
        h.step(200); // HEDGE_POST_PENDING

        h.engine.force_disarm();
        assert_eq!(h.engine.session.state(), TradingState::Disarmed);
        let pair = h.engine.pairs.pair(1).unwrap();
        assert_eq!(pair.state, PairState::Failed);

        // A hedge cancel went out.
        assert!(h
            .broker
            .submissions()
            .iter()
            .any(|s| s.rq_name.starts_with("CXL_")));
        // The take filled and the hedge did not: residual inventory remains
        // and is reported.
        assert_eq!(h.engine.pairs.inventory("005930"), -10);
        assert_eq!(h.engine.pairs.non_flat_symbols(), vec![("005930".into(), -10)]);
    }

    #[test]
    fn halted_symbol_is_not_traded_until_released() {
        let mut h = harness();
        h.arm();

        // The symbol goes into a volatility-interruption halt.
        h.broker.push_halt("005930", true);
        h.drain();
        assert!(h.engine.halts.is_halted("005930"));

        // A crossed book on the halted name produces nothing.
        h.push_crossed_quotes();
        h.step(50);
        assert!(h.broker.submissions().is_empty());
        assert_eq!(h.engine.pairs.active_pair_count(), 0);

        // Halt released: the next quote update is tradable again.
        h.broker.push_halt("005930", false);
        h.drain();
        h.broker.push_quote("005930", 72_010, 72_100, 100, 100);
        h.drain();
        h.step(50);
        assert_eq!(h.engine.pairs.active_pair_count(), 1);
    }

    #[tokio::test]
    async fn subscriptions_cover_all_shards() {
        let mut h = harness();
        h.engine.subscribe_universe().await;

        let subs = h.broker.subscriptions();
        assert_eq!(subs.len(), 1); // 2 symbols -> one shard
        assert_eq!(subs[0].0, 101);
        assert_eq!(subs[0].1, 4); // KRX + NXT codes
    }

    #[tokio::test]
    async fn halt_list_loads_at_startup() {
        let mut h = harness();
        h.broker.set_halt_list(vec!["005930".into()]);
        h.engine.subscribe_universe().await;

        // The snapshot arrives like any TR response, shortly after.
        h.clock.advance(60);
        h.engine.on_sweep_tick();
        h.drain();

        assert!(h.engine.halts.is_halted("005930"));
        assert!(!h.engine.halts.is_halted("000660"));
        assert_eq!(h.engine.halts.halted_count(), 1);
    }
}
