// =============================================================================
// Throttler — dual token buckets with urgent reservation and auto-pause
// =============================================================================
//
// The broker enforces hard per-second caps on orders and queries. Each cap is
// modelled as a token bucket with rate R and capacity R (a one-second burst),
// refilled continuously on every request.
//
// Two protections sit on top of the raw buckets:
//   - Reservation: K order tokens are held back for URGENT traffic (cancels,
//     hedge escalations). NORMAL requests are denied if granting them would
//     dip into the reserve.
//   - Auto-pause: when orders-bucket utilization stays at or above the
//     threshold for the sustain period, new NORMAL orders are denied until a
//     utilization sample drops below the threshold. URGENT traffic is never
//     paused.
// =============================================================================

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ThrottleConfig;
use crate::errors::DenyReason;
use crate::types::Priority;

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    fn new(rate_per_sec: f64) -> Self {
        Self {
            tokens: rate_per_sec,
            capacity: rate_per_sec,
            rate_per_sec,
            last_refill_ms: 0,
        }
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms > 0 {
            self.tokens =
                (self.tokens + elapsed_ms as f64 / 1000.0 * self.rate_per_sec).min(self.capacity);
            self.last_refill_ms = now_ms;
        }
    }

    fn try_take(&mut self, n: f64) -> bool {
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn utilization(&self) -> f64 {
        if self.capacity > 0.0 {
            1.0 - self.tokens / self.capacity
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Throttler
// ---------------------------------------------------------------------------

/// Serialisable snapshot of the throttle state.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleSnapshot {
    pub order_tokens: f64,
    pub query_tokens: f64,
    pub orders_utilization: f64,
    pub paused: bool,
    pub hot_seconds: u32,
}

pub struct Throttler {
    orders: TokenBucket,
    queries: TokenBucket,
    reserve_urgent: f64,
    min_free_for_new_pair: f64,
    pause_threshold: f64,
    pause_sustain_secs: u32,
    hot_seconds: u32,
    paused: bool,
}

impl Throttler {
    pub fn new(cfg: &ThrottleConfig) -> Self {
        Self {
            orders: TokenBucket::new(cfg.orders_bucket_per_sec),
            queries: TokenBucket::new(cfg.queries_bucket_per_sec),
            reserve_urgent: cfg.reserve_order_tokens,
            min_free_for_new_pair: cfg.min_tokens_free_to_start_new_pair,
            pause_threshold: cfg.autopause_threshold,
            pause_sustain_secs: cfg.autopause_sustain_secs,
            hot_seconds: 0,
            paused: false,
        }
    }

    /// Request one order token. NORMAL requests are refused while paused and
    /// may not dip into the urgent reserve; URGENT requests bypass both but
    /// still need a token.
    pub fn acquire_order(&mut self, priority: Priority, now_ms: u64) -> Result<(), DenyReason> {
        self.orders.refill(now_ms);

        if priority == Priority::Normal && self.paused {
            debug!("order token denied: auto-paused");
            return Err(DenyReason::AutoPaused);
        }
        if self.orders.tokens < 1.0 {
            debug!(priority = %priority, "order token denied: bucket exhausted");
            return Err(DenyReason::Exhausted);
        }
        if priority == Priority::Normal && self.orders.tokens - 1.0 < self.reserve_urgent {
            debug!(
                tokens = self.orders.tokens,
                reserve = self.reserve_urgent,
                "order token denied: urgent reserve"
            );
            return Err(DenyReason::Reserved);
        }

        self.orders.try_take(1.0);
        Ok(())
    }

    /// Request one query token (subscriptions, TR queries). No reservation or
    /// pause applies.
    pub fn acquire_query(&mut self, now_ms: u64) -> Result<(), DenyReason> {
        self.queries.refill(now_ms);
        if self.queries.try_take(1.0) {
            Ok(())
        } else {
            Err(DenyReason::Exhausted)
        }
    }

    /// Sample orders-bucket utilization. Call at 1 Hz: `sustain_secs`
    /// consecutive hot samples trip the pause; the first cool sample releases
    /// it.
    pub fn sample_utilization(&mut self, now_ms: u64) {
        self.orders.refill(now_ms);
        let util = self.orders.utilization();

        if util >= self.pause_threshold {
            self.hot_seconds += 1;
            if !self.paused && self.hot_seconds >= self.pause_sustain_secs {
                self.paused = true;
                warn!(
                    utilization = util,
                    sustained_secs = self.hot_seconds,
                    "auto-pause engaged: NORMAL order flow suspended"
                );
            }
        } else {
            if self.paused {
                info!(utilization = util, "auto-pause released");
            }
            self.hot_seconds = 0;
            self.paused = false;
        }
    }

    /// Enough headroom to start a new pair and not paused.
    pub fn can_start_new_pair(&mut self, now_ms: u64) -> bool {
        self.orders.refill(now_ms);
        self.orders.tokens >= self.min_free_for_new_pair && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        ThrottleSnapshot {
            order_tokens: self.orders.tokens,
            query_tokens: self.queries.tokens,
            orders_utilization: self.orders.utilization(),
            paused: self.paused,
            hot_seconds: self.hot_seconds,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
