// =============================================================================
// Simulated broker — deterministic scripted venue
// =============================================================================
//
// Stands in for the real broker bridge in paper mode and in tests. Order
// behavior is scripted per submission (FIFO): the default script acks after
// 50 ms and fully fills after 100 ms. Event delivery is driven by the
// engine's own clock through `poll`, so runs are fully deterministic.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::venue::{fid, halt, status, SubmitRequest, VenueClient, VenueEvent};

/// How one submitted order behaves.
#[derive(Debug, Clone)]
pub enum OrderScript {
    /// TR ack after `ack_delay_ms`, full fill after `fill_delay_ms` (both
    /// from submit). A `None` price fills at the order's limit price, or the
    /// default fill price for unpriced types.
    Fill {
        ack_delay_ms: u64,
        fill_delay_ms: u64,
        price: Option<i64>,
    },
    /// Ack, then a partial fill of `first_qty`, then the remainder.
    PartialThenFill {
        ack_delay_ms: u64,
        first_qty: u32,
        first_delay_ms: u64,
        final_delay_ms: u64,
        price: Option<i64>,
    },
    /// Ack, then rest on the book without filling (hedge-timeout path).
    AcceptOnly { ack_delay_ms: u64 },
    /// TR response with an empty order number (TR-level rejection).
    RejectEmptyTr { delay_ms: u64 },
    /// Broker message rejection before any accept.
    RejectMessage { delay_ms: u64, msg: String },
    /// No response at all (ack-timeout path).
    Silent,
}

impl Default for OrderScript {
    fn default() -> Self {
        Self::Fill {
            ack_delay_ms: 50,
            fill_delay_ms: 100,
            price: None,
        }
    }
}

struct Inner {
    now_ms: u64,
    seq: u64,
    next_broker_id: u64,
    next_exec_id: u64,
    scripts: VecDeque<OrderScript>,
    submissions: Vec<SubmitRequest>,
    subscriptions: Vec<(u16, usize)>,
    /// (due_ts, seq, event) delivered in (ts, seq) order by `poll`.
    due: Vec<(u64, u64, VenueEvent)>,
    /// Codes returned by the halt-list TR.
    halt_list: Vec<String>,
    default_fill_price: i64,
    cancel_confirm_delay_ms: u64,
}

/// Scripted broker. Shared as `Arc<SimBroker>`; all interior state is behind
/// one mutex since callers are the engine task and the test thread.
pub struct SimBroker {
    tx: UnboundedSender<VenueEvent>,
    inner: Mutex<Inner>,
}

impl SimBroker {
    pub fn new(tx: UnboundedSender<VenueEvent>) -> Arc<Self> {
        Arc::new(Self {
            tx,
            inner: Mutex::new(Inner {
                now_ms: 0,
                seq: 0,
                next_broker_id: 100_000,
                next_exec_id: 1,
                scripts: VecDeque::new(),
                submissions: Vec::new(),
                subscriptions: Vec::new(),
                due: Vec::new(),
                halt_list: Vec::new(),
                default_fill_price: 50_000,
                cancel_confirm_delay_ms: 50,
            }),
        })
    }

    /// Queue the behavior for the next submitted order (FIFO).
    pub fn push_script(&self, script: OrderScript) {
        self.inner.lock().scripts.push_back(script);
    }

    pub fn set_default_fill_price(&self, price: i64) {
        self.inner.lock().default_fill_price = price;
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.inner.lock().submissions.clone()
    }

    pub fn subscriptions(&self) -> Vec<(u16, usize)> {
        self.inner.lock().subscriptions.clone()
    }

    /// Inject an L1 quote for a wire code (delivered immediately).
    pub fn push_quote(&self, code: &str, bid: i64, ask: i64, bid_size: u32, ask_size: u32) {
        let mut fields = HashMap::new();
        fields.insert(fid::BID_PRICE, bid.to_string());
        fields.insert(fid::ASK_PRICE, ask.to_string());
        fields.insert(fid::BID_SIZE, bid_size.to_string());
        fields.insert(fid::ASK_SIZE, ask_size.to_string());
        let _ = self.tx.send(VenueEvent::Quote {
            code: code.to_string(),
            fields,
        });
    }

    /// Inject an NXT session-phase signal (delivered immediately).
    pub fn push_session_phase(&self, code: char) {
        let _ = self.tx.send(VenueEvent::SessionPhase { code });
    }

    /// Set the codes the halt-list TR will return.
    pub fn set_halt_list(&self, codes: Vec<String>) {
        self.inner.lock().halt_list = codes;
    }

    /// Inject a real-time halt engage/release event (delivered immediately).
    pub fn push_halt(&self, code: &str, halted: bool) {
        let _ = self.tx.send(VenueEvent::Halt {
            code: code.to_string(),
            halted,
        });
    }

    fn schedule(inner: &mut Inner, at_ms: u64, event: VenueEvent) {
        inner.seq += 1;
        let seq = inner.seq;
        inner.due.push((at_ms, seq, event));
    }

    fn chejan_fields(
        broker_id: &str,
        code: &str,
        order_status: &str,
        remaining: u32,
        fill_price: i64,
        fill_qty: u32,
        exec_id: &str,
    ) -> HashMap<u16, String> {
        let mut m = HashMap::new();
        m.insert(fid::BROKER_ORDER_ID, broker_id.to_string());
        m.insert(fid::CHEJAN_SYMBOL, code.to_string());
        m.insert(fid::ORDER_STATUS, order_status.to_string());
        m.insert(fid::REMAINING_QTY, remaining.to_string());
        m.insert(fid::FILL_PRICE, fill_price.to_string());
        m.insert(fid::FILL_QTY, fill_qty.to_string());
        m.insert(fid::EXEC_ID, exec_id.to_string());
        m
    }

    fn schedule_fill(
        inner: &mut Inner,
        at_ms: u64,
        broker_id: &str,
        code: &str,
        remaining: u32,
        price: i64,
        qty: u32,
    ) {
        let exec_id = format!("exec_{}", inner.next_exec_id);
        inner.next_exec_id += 1;
        let fields =
            Self::chejan_fields(broker_id, code, status::FILLED, remaining, price, qty, &exec_id);
        Self::schedule(
            inner,
            at_ms,
            VenueEvent::Chejan {
                gubun: "0".into(),
                fields,
            },
        );
    }

    fn handle_new_order(&self, inner: &mut Inner, req: &SubmitRequest) {
        let script = inner.scripts.pop_front().unwrap_or_default();
        let now = inner.now_ms;

        let broker_id = inner.next_broker_id.to_string();
        inner.next_broker_id += 1;

        let fill_price = |p: Option<i64>, inner: &Inner| {
            p.unwrap_or(if req.price > 0 {
                req.price
            } else {
                inner.default_fill_price
            })
        };

        let ack = |inner: &mut Inner, at: u64, order_no: &str| {
            Self::schedule(
                inner,
                at,
                VenueEvent::TrData {
                    screen: req.screen.to_string(),
                    rq_name: req.rq_name.clone(),
                    tr_code: "ORDER".into(),
                    broker_order_id: order_no.to_string(),
                },
            );
        };

        match script {
            OrderScript::Fill {
                ack_delay_ms,
                fill_delay_ms,
                price,
            } => {
                let px = fill_price(price, inner);
                ack(inner, now + ack_delay_ms, &broker_id);
                Self::schedule_fill(
                    inner,
                    now + fill_delay_ms,
                    &broker_id,
                    &req.code,
                    0,
                    px,
                    req.qty,
                );
            }
            OrderScript::PartialThenFill {
                ack_delay_ms,
                first_qty,
                first_delay_ms,
                final_delay_ms,
                price,
            } => {
                let px = fill_price(price, inner);
                let first = first_qty.min(req.qty);
                let rest = req.qty - first;
                ack(inner, now + ack_delay_ms, &broker_id);
                Self::schedule_fill(
                    inner,
                    now + first_delay_ms,
                    &broker_id,
                    &req.code,
                    rest,
                    px,
                    first,
                );
                if rest > 0 {
                    Self::schedule_fill(
                        inner,
                        now + final_delay_ms,
                        &broker_id,
                        &req.code,
                        0,
                        px,
                        rest,
                    );
                }
            }
            OrderScript::AcceptOnly { ack_delay_ms } => {
                ack(inner, now + ack_delay_ms, &broker_id);
            }
            OrderScript::RejectEmptyTr { delay_ms } => {
                ack(inner, now + delay_ms, "");
            }
            OrderScript::RejectMessage { delay_ms, msg } => {
                Self::schedule(
                    inner,
                    now + delay_ms,
                    VenueEvent::Message {
                        screen: req.screen.to_string(),
                        rq_name: req.rq_name.clone(),
                        tr_code: "ORDER".into(),
                        msg,
                    },
                );
            }
            OrderScript::Silent => {}
        }
    }

    fn handle_cancel(&self, inner: &mut Inner, req: &SubmitRequest) {
        let now = inner.now_ms;
        let delay = inner.cancel_confirm_delay_ms;

        // TR ack for the cancel request itself (a fresh order number).
        let cancel_no = inner.next_broker_id.to_string();
        inner.next_broker_id += 1;
        Self::schedule(
            inner,
            now + delay,
            VenueEvent::TrData {
                screen: req.screen.to_string(),
                rq_name: req.rq_name.clone(),
                tr_code: "ORDER".into(),
                broker_order_id: cancel_no,
            },
        );

        // Cancel confirmation against the original order.
        let fields = Self::chejan_fields(
            &req.orig_order_id,
            &req.code,
            status::CANCEL_CONFIRMED,
            0,
            0,
            0,
            "",
        );
        Self::schedule(
            inner,
            now + delay,
            VenueEvent::Chejan {
                gubun: "0".into(),
                fields,
            },
        );
    }
}

impl VenueClient for SimBroker {
    fn login(&self, _show_account_pw: bool) -> bool {
        let _ = self.tx.send(VenueEvent::SessionConnect { err: 0 });
        true
    }

    fn subscribe(&self, screen: u16, codes: &[String], _fids: &[u16]) -> Result<()> {
        self.inner.lock().subscriptions.push((screen, codes.len()));
        Ok(())
    }

    fn submit(&self, req: &SubmitRequest) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.submissions.push(req.clone());

        // KRX cancel verbs are 3/4; NXT's sit at +10.
        let is_cancel = matches!(req.op_code, 3 | 4 | 13 | 14);
        debug!(
            rq_name = %req.rq_name,
            code = %req.code,
            op_code = req.op_code,
            qty = req.qty,
            price = req.price,
            is_cancel,
            "sim order received"
        );

        if is_cancel {
            self.handle_cancel(&mut inner, req);
        } else {
            self.handle_new_order(&mut inner, req);
        }
        Ok(())
    }

    fn request_halt_list(&self, _screen: u16) -> Result<()> {
        let mut inner = self.inner.lock();
        debug!(
            rq_name = halt::RQ_NAME,
            tr_code = halt::TR_CODE,
            codes = inner.halt_list.len(),
            "sim halt list requested"
        );
        let now = inner.now_ms;
        let codes = inner.halt_list.clone();
        Self::schedule(&mut inner, now + 50, VenueEvent::HaltSnapshot { codes });
        Ok(())
    }

    /// Deliver every scheduled event due at or before `now_ms`, in order.
    fn poll(&self, now_ms: u64) {
        let mut inner = self.inner.lock();
        inner.now_ms = now_ms;

        let mut ready: Vec<(u64, u64, VenueEvent)> = Vec::new();
        inner.due.retain(|(ts, seq, ev)| {
            if *ts <= now_ms {
                ready.push((*ts, *seq, ev.clone()));
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|(ts, seq, _)| (*ts, *seq));

        for (_, _, ev) in ready {
            let _ = self.tx.send(ev);
        }
    }
}
