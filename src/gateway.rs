// =============================================================================
// Execution gateway — order lifecycle, ack/fill correlation, timeouts
// =============================================================================
//
// Every order intent is driven through: PENDING_SEND -> SENT -> ACCEPTED ->
// (FILLED | CANCELLED | REJECTED | TIMED_OUT). Correlation happens on two
// keys: the request name (echoed back by the TR ack) and the broker order id
// (carried by every execution report). Out-of-order delivery — a fill or an
// accepted report arriving before the TR ack — promotes state directly.
//
// Fills are deduplicated on execution id. Terminal records linger for a short
// grace window to absorb late events, then are swept.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{CancelError, SendError};
use crate::router::OrderIntent;
use crate::throttler::Throttler;
use crate::types::{OrderVerb, Priority};
use crate::venue::{
    self, fid, status, SubmitRequest, VenueClient, REJECT_KEYWORDS,
};

/// Terminal records are swept this long after completion.
const RECORD_GC_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Order records
// ---------------------------------------------------------------------------

/// Lifecycle state of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    PendingSend,
    Sent,
    Accepted,
    Filled,
    Cancelled,
    Rejected,
    TimedOut,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::TimedOut
        )
    }
}

/// One execution applied to an order.
#[derive(Debug, Clone)]
pub struct Fill {
    pub exec_id: String,
    pub qty: u32,
    pub price: i64,
    pub ts_ms: u64,
}

/// State tracked per client order id.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub client_order_id: u64,
    pub broker_order_id: Option<String>,
    pub intent: OrderIntent,
    pub state: OrderState,
    pub filled_qty: u32,
    pub remaining_qty: u32,
    pub vwap: f64,
    pub fills: Vec<Fill>,
    pub send_ts: u64,
    pub ack_ts: Option<u64>,
    ack_deadline: Option<u64>,
    accept_probe_deadline: Option<u64>,
    stuck_emitted: bool,
    cleanup_at: Option<u64>,
}

/// Timeout categories surfaced by [`ExecutionEvent::OrderTimeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    TrAck,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrAck => write!(f, "tr_ack"),
        }
    }
}

/// Events emitted by the gateway, consumed by the pair manager and journal.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    OrderAck {
        client_order_id: u64,
        broker_order_id: String,
        latency_ms: u64,
    },
    OrderAccepted {
        client_order_id: u64,
    },
    OrderRejected {
        client_order_id: u64,
        reason: String,
    },
    TradePartial {
        client_order_id: u64,
        fill_qty: u32,
        fill_price: i64,
        filled_qty: u32,
        remaining_qty: u32,
    },
    TradeFill {
        client_order_id: u64,
        fill_qty: u32,
        fill_price: i64,
        filled_qty: u32,
        vwap: f64,
    },
    OrderCancelled {
        client_order_id: u64,
    },
    OrderTimeout {
        client_order_id: u64,
        kind: TimeoutKind,
    },
    OrderStuck {
        client_order_id: u64,
    },
}

impl ExecutionEvent {
    pub fn client_order_id(&self) -> u64 {
        match self {
            Self::OrderAck { client_order_id, .. }
            | Self::OrderAccepted { client_order_id }
            | Self::OrderRejected { client_order_id, .. }
            | Self::TradePartial { client_order_id, .. }
            | Self::TradeFill { client_order_id, .. }
            | Self::OrderCancelled { client_order_id }
            | Self::OrderTimeout { client_order_id, .. }
            | Self::OrderStuck { client_order_id } => *client_order_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct ExecutionGateway {
    client: Arc<dyn VenueClient>,
    account: String,
    order_screen: u16,
    ack_timeout_ms: u64,
    accept_probe_ms: u64,

    next_client_id: u64,
    records: HashMap<u64, OrderRecord>,
    by_broker: HashMap<String, u64>,
    by_rq: HashMap<String, u64>,
    events: Vec<ExecutionEvent>,
}

impl ExecutionGateway {
    pub fn new(
        client: Arc<dyn VenueClient>,
        account: String,
        order_screen: u16,
        ack_timeout_ms: u64,
        accept_probe_ms: u64,
    ) -> Self {
        Self {
            client,
            account,
            order_screen,
            ack_timeout_ms,
            accept_probe_ms,
            next_client_id: 1,
            records: HashMap::new(),
            by_broker: HashMap::new(),
            by_rq: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Events accumulated since the last drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<ExecutionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn record(&self, client_order_id: u64) -> Option<&OrderRecord> {
        self.records.get(&client_order_id)
    }

    // -------------------------------------------------------------------------
    // Send path
    // -------------------------------------------------------------------------

    /// Drive an intent onto the wire. On throttle denial or synchronous
    /// submit failure an `OrderRejected` event is emitted and the error
    /// returned; otherwise the ack timeout is armed and the new client order
    /// id returned.
    pub fn send(
        &mut self,
        intent: OrderIntent,
        throttler: &mut Throttler,
        now_ms: u64,
    ) -> Result<u64, SendError> {
        let client_order_id = self.next_client_id;
        self.next_client_id += 1;

        if let Err(deny) = throttler.acquire_order(intent.priority, now_ms) {
            debug!(
                client_order_id,
                pair_id = intent.pair_id,
                reason = %deny,
                "order denied by throttler"
            );
            self.events.push(ExecutionEvent::OrderRejected {
                client_order_id,
                reason: deny.to_string(),
            });
            return Err(SendError::Throttled(deny));
        }

        let rq_name = format!("ORD_{client_order_id}");
        let req = SubmitRequest {
            rq_name: rq_name.clone(),
            screen: self.order_screen,
            account: self.account.clone(),
            op_code: venue::op_code(intent.venue, intent.side, OrderVerb::New),
            code: venue::wire_code(&intent.symbol, intent.venue),
            qty: intent.qty,
            price: intent.price,
            hoga: intent.order_type.hoga_code(),
            orig_order_id: String::new(),
        };

        let mut record = OrderRecord {
            client_order_id,
            broker_order_id: None,
            intent,
            state: OrderState::PendingSend,
            filled_qty: 0,
            remaining_qty: req.qty,
            vwap: 0.0,
            fills: Vec::new(),
            send_ts: now_ms,
            ack_ts: None,
            ack_deadline: None,
            accept_probe_deadline: None,
            stuck_emitted: false,
            cleanup_at: None,
        };

        match self.client.submit(&req) {
            Ok(()) => {
                record.state = OrderState::Sent;
                record.ack_deadline = Some(now_ms + self.ack_timeout_ms);
                info!(
                    client_order_id,
                    pair_id = record.intent.pair_id,
                    leg = %record.intent.leg,
                    symbol = %record.intent.symbol,
                    venue = %record.intent.venue,
                    side = %record.intent.side,
                    qty = record.intent.qty,
                    price = record.intent.price,
                    order_type = %record.intent.order_type,
                    "order sent"
                );
                self.by_rq.insert(rq_name, client_order_id);
                self.records.insert(client_order_id, record);
                Ok(client_order_id)
            }
            Err(e) => {
                let reason = format!("send_failed: {e}");
                warn!(client_order_id, error = %e, "synchronous submit failure");
                record.state = OrderState::Rejected;
                record.cleanup_at = Some(now_ms + RECORD_GC_MS);
                self.records.insert(client_order_id, record);
                self.events.push(ExecutionEvent::OrderRejected {
                    client_order_id,
                    reason,
                });
                Err(SendError::SubmitFailed(e.to_string()))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cancel path
    // -------------------------------------------------------------------------

    /// Cancel a working order. Requires the broker order id (i.e. the order
    /// has been acked) and one urgent token. Confirmation flows back through
    /// the normal chejan correlation.
    pub fn cancel(
        &mut self,
        client_order_id: u64,
        throttler: &mut Throttler,
        now_ms: u64,
    ) -> Result<(), CancelError> {
        let record = self
            .records
            .get(&client_order_id)
            .ok_or(CancelError::UnknownOrder(client_order_id))?;
        let broker_order_id = record
            .broker_order_id
            .clone()
            .ok_or(CancelError::NoBrokerId(client_order_id))?;

        throttler
            .acquire_order(Priority::Urgent, now_ms)
            .map_err(CancelError::Throttled)?;

        let req = SubmitRequest {
            rq_name: format!("CXL_{client_order_id}"),
            screen: self.order_screen,
            account: self.account.clone(),
            op_code: venue::op_code(record.intent.venue, record.intent.side, OrderVerb::Cancel),
            code: venue::wire_code(&record.intent.symbol, record.intent.venue),
            qty: record.remaining_qty,
            price: 0,
            hoga: record.intent.order_type.hoga_code(),
            orig_order_id: broker_order_id.clone(),
        };

        self.client
            .submit(&req)
            .map_err(|e| CancelError::SubmitFailed(e.to_string()))?;

        info!(
            client_order_id,
            broker_order_id = %broker_order_id,
            remaining_qty = record.remaining_qty,
            "cancel sent"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // TR-ack correlation
    // -------------------------------------------------------------------------

    pub fn on_tr_data(
        &mut self,
        _screen: &str,
        rq_name: &str,
        _tr_code: &str,
        broker_order_id: &str,
        now_ms: u64,
    ) {
        if rq_name.starts_with("CXL_") {
            if broker_order_id.trim().is_empty() {
                warn!(rq_name, "cancel rejected at TR level");
            } else {
                debug!(rq_name, broker_order_id, "cancel acknowledged");
            }
            return;
        }

        let Some(&client_order_id) = self.by_rq.get(rq_name) else {
            debug!(rq_name, "TR data for unknown request");
            return;
        };

        let broker_order_id = broker_order_id.trim();
        if broker_order_id.is_empty() {
            // TR-level rejection: the broker returned no order number.
            warn!(client_order_id, "TR returned empty order number");
            self.finish(
                client_order_id,
                OrderState::Rejected,
                ExecutionEvent::OrderRejected {
                    client_order_id,
                    reason: "tr_empty_order_number".into(),
                },
                now_ms,
            );
            return;
        }

        self.promote_ack(client_order_id, broker_order_id, now_ms);
    }

    /// Attach the broker order id and promote SENT -> ACCEPTED, emitting the
    /// ack event with its latency and arming the stuck probe. Idempotent:
    /// a second ack (or an ack after a chejan promotion) only fills gaps.
    fn promote_ack(&mut self, client_order_id: u64, broker_order_id: &str, now_ms: u64) {
        let Some(record) = self.records.get_mut(&client_order_id) else {
            return;
        };

        if record.broker_order_id.is_none() {
            record.broker_order_id = Some(broker_order_id.to_string());
            self.by_broker
                .insert(broker_order_id.to_string(), client_order_id);
        }

        if record.ack_ts.is_none() {
            record.ack_ts = Some(now_ms);
            record.ack_deadline = None;
            let latency_ms = now_ms.saturating_sub(record.send_ts);

            if record.state == OrderState::Sent {
                record.state = OrderState::Accepted;
            }
            if record.state == OrderState::Accepted && record.filled_qty == 0 {
                record.accept_probe_deadline = Some(now_ms + self.accept_probe_ms);
            }

            info!(
                client_order_id,
                broker_order_id,
                latency_ms,
                "order acked"
            );
            self.events.push(ExecutionEvent::OrderAck {
                client_order_id,
                broker_order_id: broker_order_id.to_string(),
                latency_ms,
            });
        }
    }

    // -------------------------------------------------------------------------
    // Execution-report correlation
    // -------------------------------------------------------------------------

    pub fn on_chejan(&mut self, _gubun: &str, fields: &HashMap<u16, String>, now_ms: u64) {
        let broker_order_id = fields
            .get(&fid::BROKER_ORDER_ID)
            .map(|s| s.trim())
            .unwrap_or("");
        if broker_order_id.is_empty() {
            debug!("chejan without broker order id ignored");
            return;
        }

        let client_order_id = match self.by_broker.get(broker_order_id) {
            Some(&id) => id,
            None => {
                // Execution report before the TR ack: adopt the oldest
                // in-flight order for the same symbol and treat it as acked.
                match self.adopt_unacked(fields) {
                    Some(id) => {
                        debug!(
                            broker_order_id,
                            client_order_id = id,
                            "execution report before TR ack; promoting"
                        );
                        self.promote_ack(id, broker_order_id, now_ms);
                        id
                    }
                    None => {
                        debug!(broker_order_id, "chejan for unknown order ignored");
                        return;
                    }
                }
            }
        };

        let order_status = fields.get(&fid::ORDER_STATUS).map(String::as_str).unwrap_or("");
        let fill_qty = fields
            .get(&fid::FILL_QTY)
            .map(|v| venue::parse_broker_int(v))
            .unwrap_or(0) as u32;
        let fill_price = fields
            .get(&fid::FILL_PRICE)
            .map(|v| venue::parse_broker_int(v))
            .unwrap_or(0);
        let exec_id = fields.get(&fid::EXEC_ID).cloned().unwrap_or_default();

        if fill_qty > 0 {
            self.apply_fill(client_order_id, exec_id, fill_qty, fill_price, fields, now_ms);
            return;
        }

        // Non-fill report: acceptance echo or cancel confirmation.
        if order_status == status::ACCEPTED {
            let Some(record) = self.records.get_mut(&client_order_id) else {
                return;
            };
            if record.state == OrderState::Sent {
                record.state = OrderState::Accepted;
                self.events
                    .push(ExecutionEvent::OrderAccepted { client_order_id });
            }
            return;
        }

        let remaining = fields
            .get(&fid::REMAINING_QTY)
            .map(|v| venue::parse_broker_int(v));
        let cancelled =
            order_status == status::CANCEL_CONFIRMED || remaining == Some(0);
        if cancelled {
            let already_terminal = self
                .records
                .get(&client_order_id)
                .map(|r| r.state.is_terminal())
                .unwrap_or(true);
            if !already_terminal {
                self.finish(
                    client_order_id,
                    OrderState::Cancelled,
                    ExecutionEvent::OrderCancelled { client_order_id },
                    now_ms,
                );
            }
        }
    }

    fn apply_fill(
        &mut self,
        client_order_id: u64,
        exec_id: String,
        fill_qty: u32,
        fill_price: i64,
        fields: &HashMap<u16, String>,
        now_ms: u64,
    ) {
        let Some(record) = self.records.get_mut(&client_order_id) else {
            return;
        };

        // Dedup re-delivered execution reports on execution id.
        if !exec_id.is_empty() && record.fills.iter().any(|f| f.exec_id == exec_id) {
            warn!(client_order_id, exec_id = %exec_id, "duplicate execution report ignored");
            return;
        }

        record.fills.push(Fill {
            exec_id,
            qty: fill_qty,
            price: fill_price,
            ts_ms: now_ms,
        });
        record.filled_qty += fill_qty;
        record.remaining_qty = fields
            .get(&fid::REMAINING_QTY)
            .map(|v| venue::parse_broker_int(v) as u32)
            .unwrap_or_else(|| record.intent.qty.saturating_sub(record.filled_qty));

        let notional: f64 = record
            .fills
            .iter()
            .map(|f| f.price as f64 * f.qty as f64)
            .sum();
        record.vwap = notional / record.filled_qty.max(1) as f64;
        record.accept_probe_deadline = None;

        if record.state == OrderState::Sent {
            // Fill before TR ack: promote directly.
            record.state = OrderState::Accepted;
        }

        if record.remaining_qty > 0 {
            info!(
                client_order_id,
                fill_qty,
                fill_price,
                filled_qty = record.filled_qty,
                remaining_qty = record.remaining_qty,
                "partial fill"
            );
            self.events.push(ExecutionEvent::TradePartial {
                client_order_id,
                fill_qty,
                fill_price,
                filled_qty: record.filled_qty,
                remaining_qty: record.remaining_qty,
            });
        } else {
            record.state = OrderState::Filled;
            record.cleanup_at = Some(now_ms + RECORD_GC_MS);
            info!(
                client_order_id,
                fill_qty,
                fill_price,
                filled_qty = record.filled_qty,
                vwap = record.vwap,
                "order filled"
            );
            self.events.push(ExecutionEvent::TradeFill {
                client_order_id,
                fill_qty,
                fill_price,
                filled_qty: record.filled_qty,
                vwap: record.vwap,
            });
        }
    }

    /// Find the oldest in-flight order for the report's symbol that has no
    /// broker id yet.
    fn adopt_unacked(&self, fields: &HashMap<u16, String>) -> Option<u64> {
        let code = fields.get(&fid::CHEJAN_SYMBOL)?;
        let (symbol, _) = venue::split_code(code.trim());

        self.records
            .values()
            .filter(|r| {
                r.state == OrderState::Sent
                    && r.broker_order_id.is_none()
                    && r.intent.symbol == symbol
            })
            .min_by_key(|r| r.send_ts)
            .map(|r| r.client_order_id)
    }

    // -------------------------------------------------------------------------
    // Broker messages
    // -------------------------------------------------------------------------

    /// A broker message carrying a rejection keyword before any accept fails
    /// the order.
    pub fn on_message(
        &mut self,
        _screen: &str,
        rq_name: &str,
        _tr_code: &str,
        msg: &str,
        now_ms: u64,
    ) {
        let Some(&client_order_id) = self.by_rq.get(rq_name) else {
            return;
        };
        let Some(record) = self.records.get(&client_order_id) else {
            return;
        };
        let pre_accept = matches!(record.state, OrderState::PendingSend | OrderState::Sent);
        if pre_accept && REJECT_KEYWORDS.iter().any(|k| msg.contains(k)) {
            warn!(client_order_id, msg, "order rejected by venue message");
            self.finish(
                client_order_id,
                OrderState::Rejected,
                ExecutionEvent::OrderRejected {
                    client_order_id,
                    reason: msg.to_string(),
                },
                now_ms,
            );
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    /// Fire due deadlines and sweep expired records. Called from the engine's
    /// periodic tick.
    pub fn poll_timers(&mut self, now_ms: u64) {
        let mut timed_out = Vec::new();
        let mut stuck = Vec::new();
        let mut expired = Vec::new();

        for record in self.records.values_mut() {
            if let Some(deadline) = record.ack_deadline {
                if now_ms >= deadline && record.state == OrderState::Sent {
                    timed_out.push(record.client_order_id);
                }
            }
            if let Some(deadline) = record.accept_probe_deadline {
                if now_ms >= deadline
                    && record.state == OrderState::Accepted
                    && record.filled_qty == 0
                    && !record.stuck_emitted
                {
                    record.stuck_emitted = true;
                    record.accept_probe_deadline = None;
                    stuck.push(record.client_order_id);
                }
            }
            if let Some(at) = record.cleanup_at {
                if now_ms >= at {
                    expired.push(record.client_order_id);
                }
            }
        }

        for id in timed_out {
            warn!(client_order_id = id, timeout_ms = self.ack_timeout_ms, "TR ack timeout");
            self.finish(
                id,
                OrderState::TimedOut,
                ExecutionEvent::OrderTimeout {
                    client_order_id: id,
                    kind: TimeoutKind::TrAck,
                },
                now_ms,
            );
        }

        for id in stuck {
            // Diagnostic only: no state change, no cancel.
            warn!(client_order_id = id, probe_ms = self.accept_probe_ms, "order stuck after ack");
            self.events.push(ExecutionEvent::OrderStuck {
                client_order_id: id,
            });
        }

        for id in expired {
            self.remove_record(id);
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Move a record to a terminal state, emit `event`, and schedule GC.
    fn finish(
        &mut self,
        client_order_id: u64,
        state: OrderState,
        event: ExecutionEvent,
        now_ms: u64,
    ) {
        if let Some(record) = self.records.get_mut(&client_order_id) {
            record.state = state;
            record.ack_deadline = None;
            record.accept_probe_deadline = None;
            record.cleanup_at = Some(now_ms + RECORD_GC_MS);
        }
        self.events.push(event);
    }

    fn remove_record(&mut self, client_order_id: u64) {
        if let Some(record) = self.records.remove(&client_order_id) {
            self.by_rq.remove(&format!("ORD_{client_order_id}"));
            if let Some(broker_id) = &record.broker_order_id {
                self.by_broker.remove(broker_id);
            }
            debug!(client_order_id, "order record swept");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;
    use crate::types::{Leg, OrderType, Side, Venue};
    use anyhow::anyhow;
    use parking_lot::Mutex;

    /// Minimal recording venue: captures submissions, optionally refuses them.
    struct RecordingClient {
        submissions: Mutex<Vec<SubmitRequest>>,
        fail_submit: Mutex<bool>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                submissions: Mutex::new(Vec::new()),
                fail_submit: Mutex::new(false),
            })
        }

        fn submissions(&self) -> Vec<SubmitRequest> {
            self.submissions.lock().clone()
        }
    }

    impl VenueClient for RecordingClient {
        fn login(&self, _show_account_pw: bool) -> bool {
            true
        }
        fn subscribe(&self, _screen: u16, _codes: &[String], _fids: &[u16]) -> anyhow::Result<()> {
            Ok(())
        }
        fn submit(&self, req: &SubmitRequest) -> anyhow::Result<()> {
            if *self.fail_submit.lock() {
                return Err(anyhow!("refused"));
            }
            self.submissions.lock().push(req.clone());
            Ok(())
        }
    }

    fn throttler() -> Throttler {
        Throttler::new(&ThrottleConfig::default())
    }

    fn gateway(client: Arc<RecordingClient>) -> ExecutionGateway {
        ExecutionGateway::new(client, "5550001122".into(), 200, 200, 300)
    }

    fn intent(venue: Venue, side: Side) -> OrderIntent {
        OrderIntent {
            pair_id: 7,
            leg: Leg::Take,
            symbol: "005930".into(),
            venue,
            side,
            qty: 10,
            price: 0,
            order_type: OrderType::MarketIoc,
            priority: Priority::Urgent,
        }
    }

    fn chejan_fields(
        broker_id: &str,
        order_status: &str,
        remaining: u32,
        fill_price: i64,
        fill_qty: u32,
        exec_id: &str,
    ) -> HashMap<u16, String> {
        let mut m = HashMap::new();
        m.insert(fid::CHEJAN_SYMBOL, "005930".to_string());
        m.insert(fid::BROKER_ORDER_ID, broker_id.to_string());
        m.insert(fid::ORDER_STATUS, order_status.to_string());
        m.insert(fid::REMAINING_QTY, remaining.to_string());
        m.insert(fid::FILL_PRICE, fill_price.to_string());
        m.insert(fid::FILL_QTY, fill_qty.to_string());
        m.insert(fid::EXEC_ID, exec_id.to_string());
        m
    }

    #[test]
    fn send_builds_wire_request_and_arms_ack_timeout() {
        let client = RecordingClient::new();
        let mut gw = gateway(client.clone());
        let mut th = throttler();

        let id = gw.send(intent(Venue::Nxt, Side::Sell), &mut th, 100).unwrap();
        let subs = client.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].rq_name, format!("ORD_{id}"));
        assert_eq!(subs[0].code, "005930_NX");
        assert_eq!(subs[0].op_code, 12); // NXT sell new
        assert_eq!(subs[0].hoga, "13");
        assert_eq!(subs[0].price, 0);

        let rec = gw.record(id).unwrap();
        assert_eq!(rec.state, OrderState::Sent);

        // No ack: timeout fires at +200 ms.
        gw.poll_timers(299);
        assert_eq!(gw.record(id).unwrap().state, OrderState::Sent);
        gw.poll_timers(300);
        assert_eq!(gw.record(id).unwrap().state, OrderState::TimedOut);
        let events = gw.drain_events();
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::OrderTimeout {
                kind: TimeoutKind::TrAck,
                ..
            })
        ));
    }

    #[test]
    fn throttle_denial_emits_rejection() {
        let client = RecordingClient::new();
        let mut gw = gateway(client.clone());
        let mut th = throttler();

        // Exhaust the bucket.
        for _ in 0..5 {
            th.acquire_order(Priority::Urgent, 0).unwrap();
        }
        let err = gw.send(intent(Venue::Krx, Side::Sell), &mut th, 0);
        assert!(matches!(err, Err(SendError::Throttled(_))));
        assert!(client.submissions().is_empty());
        assert!(matches!(
            gw.drain_events().as_slice(),
            [ExecutionEvent::OrderRejected { .. }]
        ));
    }

    #[test]
    fn synchronous_submit_failure_rejects() {
        let client = RecordingClient::new();
        *client.fail_submit.lock() = true;
        let mut gw = gateway(client.clone());
        let mut th = throttler();

        let err = gw.send(intent(Venue::Krx, Side::Sell), &mut th, 0);
        assert!(matches!(err, Err(SendError::SubmitFailed(_))));
        let events = gw.drain_events();
        assert!(matches!(
            &events[..],
            [ExecutionEvent::OrderRejected { reason, .. }] if reason.starts_with("send_failed")
        ));
    }

    #[test]
    fn ack_then_fill_lifecycle() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Nxt, Side::Sell), &mut th, 0).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100001", 40);

        let rec = gw.record(id).unwrap();
        assert_eq!(rec.state, OrderState::Accepted);
        assert_eq!(rec.broker_order_id.as_deref(), Some("100001"));

        // Partial then final fill.
        gw.on_chejan("0", &chejan_fields("100001", status::FILLED, 6, 72_300, 4, "e1"), 90);
        gw.on_chejan("0", &chejan_fields("100001", status::FILLED, 0, 72_310, 6, "e2"), 120);

        let rec = gw.record(id).unwrap();
        assert_eq!(rec.state, OrderState::Filled);
        assert_eq!(rec.filled_qty, 10);
        assert_eq!(rec.remaining_qty, 0);
        let expected_vwap = (72_300.0 * 4.0 + 72_310.0 * 6.0) / 10.0;
        assert!((rec.vwap - expected_vwap).abs() < 1e-9);

        let events = gw.drain_events();
        assert!(matches!(events[0], ExecutionEvent::OrderAck { latency_ms: 40, .. }));
        assert!(matches!(
            events[1],
            ExecutionEvent::TradePartial {
                fill_qty: 4,
                remaining_qty: 6,
                ..
            }
        ));
        assert!(matches!(
            events[2],
            ExecutionEvent::TradeFill { filled_qty: 10, .. }
        ));
    }

    #[test]
    fn duplicate_exec_id_is_not_double_counted() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Nxt, Side::Sell), &mut th, 0).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100001", 10);

        let fields = chejan_fields("100001", status::FILLED, 6, 72_300, 4, "e1");
        gw.on_chejan("0", &fields, 50);
        gw.on_chejan("0", &fields, 60); // redelivery

        let rec = gw.record(id).unwrap();
        assert_eq!(rec.filled_qty, 4);
        assert_eq!(rec.fills.len(), 1);
    }

    #[test]
    fn fill_before_tr_ack_promotes_state() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Nxt, Side::Sell), &mut th, 0).unwrap();

        // Chejan arrives first; the unknown broker id is adopted by symbol.
        gw.on_chejan("0", &chejan_fields("100001", status::FILLED, 0, 72_300, 10, "e1"), 30);

        let rec = gw.record(id).unwrap();
        assert_eq!(rec.state, OrderState::Filled);
        assert_eq!(rec.broker_order_id.as_deref(), Some("100001"));

        // The late TR ack is a no-op.
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100001", 80);
        assert_eq!(gw.record(id).unwrap().filled_qty, 10);

        let events = gw.drain_events();
        assert!(matches!(events[0], ExecutionEvent::OrderAck { .. }));
        assert!(matches!(events[1], ExecutionEvent::TradeFill { .. }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn empty_tr_order_number_rejects() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Krx, Side::Sell), &mut th, 0).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "", 50);

        assert_eq!(gw.record(id).unwrap().state, OrderState::Rejected);
        let events = gw.drain_events();
        assert!(matches!(
            &events[..],
            [ExecutionEvent::OrderRejected { reason, .. }] if reason == "tr_empty_order_number"
        ));
    }

    #[test]
    fn reject_keyword_message_before_accept_rejects() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Krx, Side::Sell), &mut th, 0).unwrap();
        gw.on_message("200", &format!("ORD_{id}"), "ORDER", "주문 거부: 증거금 부족", 20);
        assert_eq!(gw.record(id).unwrap().state, OrderState::Rejected);

        // After accept, messages do not reject.
        let id2 = gw.send(intent(Venue::Krx, Side::Sell), &mut th, 30).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id2}"), "ORDER", "100009", 40);
        gw.on_message("200", &format!("ORD_{id2}"), "ORDER", "거부", 50);
        assert_eq!(gw.record(id2).unwrap().state, OrderState::Accepted);
    }

    #[test]
    fn cancel_requires_broker_id_and_sends_cancel_opcode() {
        let client = RecordingClient::new();
        let mut gw = gateway(client.clone());
        let mut th = throttler();

        let mut hedge = intent(Venue::Krx, Side::Buy);
        hedge.order_type = OrderType::Limit;
        hedge.price = 72_100;
        hedge.priority = Priority::Normal;
        let id = gw.send(hedge, &mut th, 0).unwrap();

        // Not acked yet: no broker id.
        assert!(matches!(
            gw.cancel(id, &mut th, 10),
            Err(CancelError::NoBrokerId(_))
        ));

        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100005", 20);
        gw.cancel(id, &mut th, 30).unwrap();

        let subs = client.submissions();
        let cxl = subs.last().unwrap();
        assert_eq!(cxl.rq_name, format!("CXL_{id}"));
        assert_eq!(cxl.op_code, 3); // KRX buy cancel
        assert_eq!(cxl.orig_order_id, "100005");

        // Confirmation flows back via chejan.
        gw.on_chejan(
            "0",
            &chejan_fields("100005", status::CANCEL_CONFIRMED, 0, 0, 0, ""),
            60,
        );
        assert_eq!(gw.record(id).unwrap().state, OrderState::Cancelled);
        assert!(gw
            .drain_events()
            .iter()
            .any(|e| matches!(e, ExecutionEvent::OrderCancelled { .. })));
    }

    #[test]
    fn stuck_probe_fires_once_without_state_change() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Krx, Side::Buy), &mut th, 0).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100007", 10);
        gw.drain_events();

        gw.poll_timers(310); // probe armed at ack+300
        gw.poll_timers(400);

        let events = gw.drain_events();
        let stuck_count = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::OrderStuck { .. }))
            .count();
        assert_eq!(stuck_count, 1);
        assert_eq!(gw.record(id).unwrap().state, OrderState::Accepted);
    }

    #[test]
    fn terminal_records_are_swept_after_grace() {
        let client = RecordingClient::new();
        let mut gw = gateway(client);
        let mut th = throttler();

        let id = gw.send(intent(Venue::Nxt, Side::Sell), &mut th, 0).unwrap();
        gw.on_tr_data("200", &format!("ORD_{id}"), "ORDER", "100001", 10);
        gw.on_chejan("0", &chejan_fields("100001", status::FILLED, 0, 72_300, 10, "e1"), 20);

        // Inside the grace window the record absorbs late events.
        gw.poll_timers(900);
        assert!(gw.record(id).is_some());

        gw.poll_timers(1_100);
        assert!(gw.record(id).is_none());
    }
}
