// =============================================================================
// Router — turns a signal into a concrete pair of order intents
// =============================================================================
//
// The take leg lifts the rich side immediately (marketable IOC, urgent); the
// hedge leg posts on the cheap side (limit, or the NXT mid-price type when
// the edge comfortably clears fees). The router also builds the cancel and
// escalation descriptors used when a resting hedge times out.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::config::RouterConfig;
use crate::spread::Signal;
use crate::types::{Leg, OrderType, Priority, Side, Venue};

/// Mid-price hedges are only used when the net edge clears this multiple of
/// total fees. Policy constant, not a derived quantity.
const MID_SAFETY_MULT: f64 = 1.5;

/// Immutable descriptor of a single order to place.
#[derive(Debug, Clone, Serialize)]
pub struct OrderIntent {
    pub pair_id: u64,
    pub leg: Leg,
    pub symbol: String,
    pub venue: Venue,
    pub side: Side,
    pub qty: u32,
    /// 0 for market / IOC-market / mid types.
    pub price: i64,
    pub order_type: OrderType,
    pub priority: Priority,
}

/// Everything the gateway needs to cancel a working order.
#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest {
    pub symbol: String,
    pub venue: Venue,
    pub side: Side,
    pub qty: u32,
    pub broker_order_id: String,
}

pub struct Router {
    allow_nxt_mid: bool,
}

impl Router {
    pub fn new(cfg: &RouterConfig) -> Self {
        Self {
            allow_nxt_mid: cfg.allow_nxt_mid,
        }
    }

    /// Build the take and hedge intents for `signal` under `pair_id`.
    pub fn build_pair(&self, pair_id: u64, signal: &Signal) -> (OrderIntent, OrderIntent) {
        let take = OrderIntent {
            pair_id,
            leg: Leg::Take,
            symbol: signal.symbol.clone(),
            venue: signal.sell_venue,
            side: Side::Sell,
            qty: signal.max_qty,
            price: 0,
            order_type: entry_order_type(signal.sell_venue),
            priority: Priority::Urgent,
        };

        let hedge_type = self.hedge_order_type(signal);
        let hedge = OrderIntent {
            pair_id,
            leg: Leg::Hedge,
            symbol: signal.symbol.clone(),
            venue: signal.buy_venue,
            side: Side::Buy,
            qty: signal.max_qty,
            price: if hedge_type.is_priced() {
                signal.buy_price
            } else {
                0
            },
            order_type: hedge_type,
            priority: Priority::Normal,
        };

        debug!(
            pair_id,
            take_venue = %take.venue,
            take_type = %take.order_type,
            hedge_venue = %hedge.venue,
            hedge_type = %hedge.order_type,
            hedge_price = hedge.price,
            "pair routed"
        );

        (take, hedge)
    }

    /// NXT mid-price when allowed and the edge comfortably exceeds fees;
    /// otherwise a limit at the signalled buy price.
    fn hedge_order_type(&self, signal: &Signal) -> OrderType {
        if signal.buy_venue == Venue::Nxt
            && self.allow_nxt_mid
            && signal.net_edge >= MID_SAFETY_MULT * signal.fee_cost
        {
            OrderType::NxtMid
        } else {
            OrderType::Limit
        }
    }

    /// Cancel descriptor for a working order placed from `intent`.
    pub fn build_cancel(&self, intent: &OrderIntent, broker_order_id: &str) -> CancelRequest {
        CancelRequest {
            symbol: intent.symbol.clone(),
            venue: intent.venue,
            side: intent.side,
            qty: intent.qty,
            broker_order_id: broker_order_id.to_string(),
        }
    }

    /// Marketable escalation of an unfilled hedge: same identity, side, and
    /// symbol, but IOC at market and urgent priority.
    pub fn build_escalation(&self, hedge: &OrderIntent, remaining_qty: u32) -> OrderIntent {
        OrderIntent {
            pair_id: hedge.pair_id,
            leg: Leg::Hedge,
            symbol: hedge.symbol.clone(),
            venue: hedge.venue,
            side: hedge.side,
            qty: remaining_qty,
            price: 0,
            order_type: OrderType::MarketIoc,
            priority: Priority::Urgent,
        }
    }
}

/// Marketable entry type for a venue: IOC where supported, else plain market.
fn entry_order_type(venue: Venue) -> OrderType {
    if venue_supports_ioc(venue) {
        OrderType::MarketIoc
    } else {
        OrderType::Market
    }
}

/// Both venues accept IOC order types on this broker.
fn venue_supports_ioc(_venue: Venue) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(buy_venue: Venue, net_edge: f64, fee_cost: f64) -> Signal {
        Signal {
            symbol: "005930".into(),
            buy_venue,
            sell_venue: buy_venue.other(),
            buy_price: 72_100,
            sell_price: 72_300,
            max_qty: 10,
            gross_edge: net_edge + fee_cost,
            fee_cost,
            net_edge,
            edge_bps: net_edge / 72_100.0 * 10_000.0,
            ts_ms: 0,
        }
    }

    #[test]
    fn take_leg_is_urgent_marketable_sell_on_rich_venue() {
        let router = Router::new(&RouterConfig::default());
        let (take, hedge) = router.build_pair(1, &signal(Venue::Krx, 178.7, 21.3));

        assert_eq!(take.leg, Leg::Take);
        assert_eq!(take.venue, Venue::Nxt);
        assert_eq!(take.side, Side::Sell);
        assert_eq!(take.order_type, OrderType::MarketIoc);
        assert_eq!(take.price, 0);
        assert_eq!(take.priority, Priority::Urgent);
        assert_eq!(take.qty, 10);

        assert_eq!(hedge.leg, Leg::Hedge);
        assert_eq!(hedge.venue, Venue::Krx);
        assert_eq!(hedge.side, Side::Buy);
        assert_eq!(hedge.priority, Priority::Normal);
    }

    #[test]
    fn krx_hedge_is_limit_at_signal_price() {
        let router = Router::new(&RouterConfig::default());
        let (_, hedge) = router.build_pair(1, &signal(Venue::Krx, 178.7, 21.3));
        assert_eq!(hedge.order_type, OrderType::Limit);
        assert_eq!(hedge.price, 72_100);
    }

    #[test]
    fn nxt_hedge_uses_mid_when_edge_comfortable() {
        let router = Router::new(&RouterConfig::default());

        // net 178.7 >= 1.5 * 21.3: mid allowed.
        let (_, hedge) = router.build_pair(1, &signal(Venue::Nxt, 178.7, 21.3));
        assert_eq!(hedge.order_type, OrderType::NxtMid);
        assert_eq!(hedge.price, 0);

        // Thin edge: falls back to limit.
        let (_, hedge) = router.build_pair(2, &signal(Venue::Nxt, 25.0, 21.3));
        assert_eq!(hedge.order_type, OrderType::Limit);
        assert_eq!(hedge.price, 72_100);
    }

    #[test]
    fn nxt_mid_can_be_disabled() {
        let router = Router::new(&RouterConfig {
            allow_nxt_mid: false,
        });
        let (_, hedge) = router.build_pair(1, &signal(Venue::Nxt, 178.7, 21.3));
        assert_eq!(hedge.order_type, OrderType::Limit);
    }

    #[test]
    fn escalation_is_urgent_market_ioc_for_remainder() {
        let router = Router::new(&RouterConfig::default());
        let (_, hedge) = router.build_pair(1, &signal(Venue::Krx, 178.7, 21.3));

        let esc = router.build_escalation(&hedge, 7);
        assert_eq!(esc.pair_id, 1);
        assert_eq!(esc.leg, Leg::Hedge);
        assert_eq!(esc.venue, hedge.venue);
        assert_eq!(esc.side, Side::Buy);
        assert_eq!(esc.qty, 7);
        assert_eq!(esc.order_type, OrderType::MarketIoc);
        assert_eq!(esc.price, 0);
        assert_eq!(esc.priority, Priority::Urgent);
    }

    #[test]
    fn cancel_request_carries_working_order_identity() {
        let router = Router::new(&RouterConfig::default());
        let (_, hedge) = router.build_pair(1, &signal(Venue::Krx, 178.7, 21.3));

        let cxl = router.build_cancel(&hedge, "100042");
        assert_eq!(cxl.symbol, "005930");
        assert_eq!(cxl.venue, Venue::Krx);
        assert_eq!(cxl.side, Side::Buy);
        assert_eq!(cxl.broker_order_id, "100042");
    }
}
