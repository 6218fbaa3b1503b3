// =============================================================================
// Shared types used across the tandem arbitrage engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A listed venue. KRX is the primary exchange; NXT is the alternative
/// trading system. The same six-digit code trades on both, with an `_NX`
/// suffix on the NXT wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Krx,
    Nxt,
}

impl Venue {
    /// The opposite venue.
    pub fn other(self) -> Self {
        match self {
            Self::Krx => Self::Nxt,
            Self::Nxt => Self::Krx,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Krx => write!(f, "KRX"),
            Self::Nxt => write!(f, "NXT"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Which leg of a paired trade an order belongs to. The take leg lifts the
/// rich side immediately; the hedge leg rests on the cheap side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    Take,
    Hedge,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Take => write!(f, "TAKE"),
            Self::Hedge => write!(f, "HEDGE"),
        }
    }
}

/// Throttle priority class. Urgent traffic (take legs, cancels, hedge
/// escalations) bypasses the reserved-token guard and auto-pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Urgent,
    Normal,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Urgent => write!(f, "URGENT"),
            Self::Normal => write!(f, "NORMAL"),
        }
    }
}

/// Broker order types. `NxtMid` is the NXT-only mid-price pegged type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    LimitIoc,
    MarketIoc,
    NxtMid,
}

impl OrderType {
    /// Two-character broker order-type code (hoga code).
    pub fn hoga_code(self) -> &'static str {
        match self {
            Self::Limit => "00",
            Self::Market => "03",
            Self::LimitIoc => "10",
            Self::MarketIoc => "13",
            Self::NxtMid => "29",
        }
    }

    /// Whether the order carries a limit price. Market and mid types must be
    /// submitted with price 0.
    pub fn is_priced(self) -> bool {
        matches!(self, Self::Limit | Self::LimitIoc)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
            Self::LimitIoc => write!(f, "LIMIT_IOC"),
            Self::MarketIoc => write!(f, "MARKET_IOC"),
            Self::NxtMid => write!(f, "NXT_MID"),
        }
    }
}

/// Broker verb for an order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderVerb {
    New,
    Cancel,
    Modify,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoga_codes_match_broker_table() {
        assert_eq!(OrderType::Limit.hoga_code(), "00");
        assert_eq!(OrderType::Market.hoga_code(), "03");
        assert_eq!(OrderType::LimitIoc.hoga_code(), "10");
        assert_eq!(OrderType::MarketIoc.hoga_code(), "13");
        assert_eq!(OrderType::NxtMid.hoga_code(), "29");
    }

    #[test]
    fn priced_types() {
        assert!(OrderType::Limit.is_priced());
        assert!(OrderType::LimitIoc.is_priced());
        assert!(!OrderType::Market.is_priced());
        assert!(!OrderType::MarketIoc.is_priced());
        assert!(!OrderType::NxtMid.is_priced());
    }

    #[test]
    fn venue_other_flips() {
        assert_eq!(Venue::Krx.other(), Venue::Nxt);
        assert_eq!(Venue::Nxt.other(), Venue::Krx);
    }
}
