// =============================================================================
// Venue client contract — broker SDK abstraction
// =============================================================================
//
// The broker SDK is the only non-deterministic collaborator of the engine, so
// it sits behind the `VenueClient` trait: the production bridge and the
// deterministic simulator present the same surface. Events travel the other
// way as `VenueEvent`s pushed into the engine's channel.
//
// Field identifiers, status strings, and op-codes below are the broker's wire
// vocabulary; nothing else in the engine speaks it.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::types::{OrderVerb, Side, Venue};

/// NXT codes carry this suffix on the wire; KRX codes are bare.
pub const NXT_SUFFIX: &str = "_NX";

// ---------------------------------------------------------------------------
// Field identifiers
// ---------------------------------------------------------------------------

/// Broker field identifiers (FIDs) for real-time and execution-report data.
pub mod fid {
    /// Best ask price (L1).
    pub const ASK_PRICE: u16 = 41;
    /// Best bid price (L1).
    pub const BID_PRICE: u16 = 51;
    /// Best ask size (L1).
    pub const ASK_SIZE: u16 = 61;
    /// Best bid size (L1).
    pub const BID_SIZE: u16 = 71;
    /// NXT session-phase code (single character, P..V).
    pub const SESSION_PHASE: u16 = 215;

    /// Symbol code on an execution report.
    pub const CHEJAN_SYMBOL: u16 = 9001;
    /// Broker order id on an execution report.
    pub const BROKER_ORDER_ID: u16 = 9203;
    /// Order status string on an execution report.
    pub const ORDER_STATUS: u16 = 913;
    /// Unfilled quantity remaining.
    pub const REMAINING_QTY: u16 = 902;
    /// Price of the last fill.
    pub const FILL_PRICE: u16 = 910;
    /// Quantity of the last fill.
    pub const FILL_QTY: u16 = 911;
    /// Execution id of the last fill (dedup key).
    pub const EXEC_ID: u16 = 909;
    /// Rejection reason, when present.
    pub const REJECT_REASON: u16 = 919;
}

/// FIDs subscribed for L1 quotes on both venues.
pub const QUOTE_FIDS: [u16; 4] = [fid::ASK_PRICE, fid::BID_PRICE, fid::ASK_SIZE, fid::BID_SIZE];

/// Order status strings carried in execution reports.
pub mod status {
    /// Order accepted by the venue.
    pub const ACCEPTED: &str = "접수";
    /// Fill (partial or full).
    pub const FILLED: &str = "체결";
    /// Cancel confirmed.
    pub const CANCEL_CONFIRMED: &str = "확인";
}

/// Substrings marking a broker message as a rejection.
pub const REJECT_KEYWORDS: [&str; 3] = ["거부", "불가", "오류"];

/// Volatility-interruption halt vocabulary: the TR that returns the current
/// halt list and the real-time type streaming engage/release events.
pub mod halt {
    pub const RQ_NAME: &str = "VI_LIST";
    pub const TR_CODE: &str = "OPT10054";
    pub const REAL_TYPE: &str = "VI발동/해제";
}

// ---------------------------------------------------------------------------
// Code helpers
// ---------------------------------------------------------------------------

/// Wire representation of `symbol` on `venue`.
pub fn wire_code(symbol: &str, venue: Venue) -> String {
    match venue {
        Venue::Krx => symbol.to_string(),
        Venue::Nxt => format!("{symbol}{NXT_SUFFIX}"),
    }
}

/// Split a wire code into (base symbol, venue).
pub fn split_code(code: &str) -> (&str, Venue) {
    match code.strip_suffix(NXT_SUFFIX) {
        Some(base) => (base, Venue::Nxt),
        None => (code, Venue::Krx),
    }
}

/// Parse a broker numeric field: strip thousand separators, sign markers,
/// and whitespace; anything non-numeric parses to 0.
pub fn parse_broker_int(raw: &str) -> i64 {
    let clean: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '+' | '-') && !c.is_whitespace())
        .collect();
    if clean.is_empty() {
        return 0;
    }
    clean.parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Op-codes
// ---------------------------------------------------------------------------

/// Broker op-code for an order submission. KRX verbs occupy 1..=6; NXT verbs
/// are the same table offset by 10.
pub fn op_code(venue: Venue, side: Side, verb: OrderVerb) -> u8 {
    let base = match (verb, side) {
        (OrderVerb::New, Side::Buy) => 1,
        (OrderVerb::New, Side::Sell) => 2,
        (OrderVerb::Cancel, Side::Buy) => 3,
        (OrderVerb::Cancel, Side::Sell) => 4,
        (OrderVerb::Modify, Side::Buy) => 5,
        (OrderVerb::Modify, Side::Sell) => 6,
    };
    match venue {
        Venue::Krx => base,
        Venue::Nxt => base + 10,
    }
}

// ---------------------------------------------------------------------------
// Requests and events
// ---------------------------------------------------------------------------

/// A single order submission handed to the broker.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    /// Request name; the TR ack echoes it back for correlation.
    pub rq_name: String,
    pub screen: u16,
    pub account: String,
    pub op_code: u8,
    /// Wire code, `_NX`-suffixed for NXT.
    pub code: String,
    pub qty: u32,
    /// 0 for market / IOC-market / mid types.
    pub price: i64,
    /// Two-character order-type code.
    pub hoga: &'static str,
    /// Broker order id of the order being cancelled/modified, else empty.
    pub orig_order_id: String,
}

/// Asynchronous events delivered by the broker adapter.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    /// Login / session connection result (0 = ok).
    SessionConnect { err: i32 },
    /// TR response carrying the broker order id under the request name.
    TrData {
        screen: String,
        rq_name: String,
        tr_code: String,
        broker_order_id: String,
    },
    /// Real-time L1 quote update; `fields` is keyed by FID.
    Quote {
        code: String,
        fields: HashMap<u16, String>,
    },
    /// NXT session-phase change (FID 215).
    SessionPhase { code: char },
    /// Execution report (chejan); `fields` is keyed by FID.
    Chejan {
        gubun: String,
        fields: HashMap<u16, String>,
    },
    /// Volatility-interruption halt list (response to the halt-list TR).
    HaltSnapshot { codes: Vec<String> },
    /// Real-time halt engage/release for one symbol.
    Halt { code: String, halted: bool },
    /// Free-form broker message tied to a request.
    Message {
        screen: String,
        rq_name: String,
        tr_code: String,
        msg: String,
    },
}

/// Abstract broker client. Submission is synchronous accept/refuse; acks,
/// fills, and quotes arrive later as [`VenueEvent`]s.
pub trait VenueClient: Send + Sync {
    /// Log in. Returns true on success (synchronous completion signal).
    fn login(&self, show_account_pw: bool) -> bool;

    /// Register real-time quotes for `codes` on `screen` with `fids`.
    fn subscribe(&self, screen: u16, codes: &[String], fids: &[u16]) -> Result<()>;

    /// Submit an order (new / cancel / modify per the op-code).
    fn submit(&self, req: &SubmitRequest) -> Result<()>;

    /// Request the current volatility-interruption halt list; the response
    /// arrives as a [`VenueEvent::HaltSnapshot`], with engage/release flips
    /// streamed as [`VenueEvent::Halt`] afterwards.
    fn request_halt_list(&self, _screen: u16) -> Result<()> {
        Ok(())
    }

    /// Give the adapter a chance to deliver due events (no-op for adapters
    /// that push from their own thread).
    fn poll(&self, _now_ms: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_code_roundtrip() {
        assert_eq!(wire_code("005930", Venue::Krx), "005930");
        assert_eq!(wire_code("005930", Venue::Nxt), "005930_NX");
        assert_eq!(split_code("005930"), ("005930", Venue::Krx));
        assert_eq!(split_code("005930_NX"), ("005930", Venue::Nxt));
    }

    #[test]
    fn parse_broker_int_strips_markers() {
        assert_eq!(parse_broker_int("72,100"), 72_100);
        assert_eq!(parse_broker_int("+150"), 150);
        assert_eq!(parse_broker_int("-150"), 150);
        assert_eq!(parse_broker_int(" 42 "), 42);
        assert_eq!(parse_broker_int(""), 0);
        assert_eq!(parse_broker_int("abc"), 0);
    }

    #[test]
    fn op_codes_distinguish_venue_and_verb() {
        assert_eq!(op_code(Venue::Krx, Side::Buy, OrderVerb::New), 1);
        assert_eq!(op_code(Venue::Krx, Side::Sell, OrderVerb::New), 2);
        assert_eq!(op_code(Venue::Krx, Side::Buy, OrderVerb::Cancel), 3);
        assert_eq!(op_code(Venue::Krx, Side::Sell, OrderVerb::Cancel), 4);
        assert_eq!(op_code(Venue::Nxt, Side::Buy, OrderVerb::New), 11);
        assert_eq!(op_code(Venue::Nxt, Side::Sell, OrderVerb::Cancel), 14);
        assert_eq!(op_code(Venue::Nxt, Side::Sell, OrderVerb::Modify), 16);
    }
}
