// =============================================================================
// Quote book — per-symbol dual-venue L1 snapshots with dirty flagging
// =============================================================================
//
// Holds the symbol universe, partitions it into screen shards (the broker
// caps real-time registrations per screen), and applies incoming quote
// updates. Changed symbols accumulate in a dirty set that the spread engine
// drains once per sweep.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::Venue;
use crate::venue::{self, fid, VenueClient, QUOTE_FIDS};

/// Broker limit on codes registered per screen. Each symbol costs two codes
/// (KRX + NXT), so a shard holds at most this many symbols.
pub const MAX_SYMBOLS_PER_SCREEN: usize = 100;

/// Quotes older than this are considered stale for readiness checks.
const STALE_AFTER_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One venue's half of a quote snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VenueQuote {
    pub bid: i64,
    pub ask: i64,
    pub bid_size: u32,
    pub ask_size: u32,
    /// Monotonic ms of the last update; 0 = never touched.
    pub last_update_ms: u64,
}

impl VenueQuote {
    /// Both sides quoted and uncrossed.
    pub fn is_valid(&self) -> bool {
        self.bid > 0 && self.ask > 0 && self.ask > self.bid
    }
}

/// Per-symbol dual-venue L1 snapshot. Owned exclusively by the quote book;
/// mutation is serialized by the sweep loop.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    pub krx: VenueQuote,
    pub nxt: VenueQuote,
    pub dirty: bool,
}

impl QuoteSnapshot {
    fn new(symbol: String) -> Self {
        Self {
            symbol,
            krx: VenueQuote::default(),
            nxt: VenueQuote::default(),
            dirty: false,
        }
    }

    pub fn venue(&self, venue: Venue) -> &VenueQuote {
        match venue {
            Venue::Krx => &self.krx,
            Venue::Nxt => &self.nxt,
        }
    }

    /// At least one valid update received from each venue.
    pub fn both_touched(&self) -> bool {
        self.krx.last_update_ms > 0 && self.nxt.last_update_ms > 0
    }
}

/// One broker subscription shard: a stable screen number and its symbols.
#[derive(Debug, Clone)]
pub struct ScreenShard {
    pub screen: u16,
    pub symbols: Vec<String>,
}

// ---------------------------------------------------------------------------
// Quote book
// ---------------------------------------------------------------------------

/// Universe of symbols and their live snapshots.
pub struct QuoteBook {
    quotes: HashMap<String, QuoteSnapshot>,
    dirty: HashSet<String>,
    shards: Vec<ScreenShard>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self {
            quotes: HashMap::new(),
            dirty: HashSet::new(),
            shards: Vec::new(),
        }
    }

    /// Initialise snapshots for `symbols` and partition them into screen
    /// shards of at most [`MAX_SYMBOLS_PER_SCREEN`], assigning each shard a
    /// stable screen number from `screen_pool` (reused round-robin when the
    /// universe outgrows the pool).
    pub fn load_universe(&mut self, symbols: &[String], screen_pool: &[u16]) {
        self.quotes.clear();
        self.dirty.clear();
        self.shards.clear();

        for symbol in symbols {
            self.quotes
                .insert(symbol.clone(), QuoteSnapshot::new(symbol.clone()));
        }

        if screen_pool.is_empty() {
            warn!("empty screen pool; no shards created");
            return;
        }

        for (i, chunk) in symbols.chunks(MAX_SYMBOLS_PER_SCREEN).enumerate() {
            let screen = screen_pool[i % screen_pool.len()];
            self.shards.push(ScreenShard {
                screen,
                symbols: chunk.to_vec(),
            });
        }

        for shard in &self.shards {
            info!(
                screen = shard.screen,
                symbols = shard.symbols.len(),
                "screen shard created"
            );
        }
        info!(
            symbols = symbols.len(),
            shards = self.shards.len(),
            "symbol universe loaded"
        );
    }

    pub fn shards(&self) -> &[ScreenShard] {
        &self.shards
    }

    /// Register quotes for every shard on both venues: the code list is the
    /// shard's KRX codes plus the `_NX`-suffixed NXT codes, with the fixed L1
    /// FID set.
    pub fn subscribe_shard(&self, shard: &ScreenShard, client: &dyn VenueClient) -> bool {
        let mut codes: Vec<String> = shard
            .symbols
            .iter()
            .map(|s| venue::wire_code(s, Venue::Krx))
            .collect();
        codes.extend(shard.symbols.iter().map(|s| venue::wire_code(s, Venue::Nxt)));

        match client.subscribe(shard.screen, &codes, &QUOTE_FIDS) {
            Ok(()) => {
                info!(
                    screen = shard.screen,
                    symbols = shard.symbols.len(),
                    codes = codes.len(),
                    "quote subscription registered"
                );
                true
            }
            Err(e) => {
                warn!(screen = shard.screen, error = %e, "quote subscription failed");
                false
            }
        }
    }

    /// Apply a real-time quote update. The venue is derived from the code
    /// suffix. A field parsing to a non-positive value keeps the previous
    /// value (the broker resends unchanged fields as blanks or signed
    /// change-markers). Returns `(symbol, venue)` when anything changed.
    pub fn apply_update(
        &mut self,
        code: &str,
        fields: &HashMap<u16, String>,
        now_ms: u64,
    ) -> Option<(String, Venue)> {
        let (base, venue) = venue::split_code(code);
        let snap = self.quotes.get_mut(base)?;

        let half = match venue {
            Venue::Krx => &mut snap.krx,
            Venue::Nxt => &mut snap.nxt,
        };
        let prev = *half;

        let get = |f: u16| fields.get(&f).map(|v| venue::parse_broker_int(v)).unwrap_or(0);
        let ask = get(fid::ASK_PRICE);
        let bid = get(fid::BID_PRICE);
        let ask_size = get(fid::ASK_SIZE);
        let bid_size = get(fid::BID_SIZE);

        if bid > 0 {
            half.bid = bid;
        }
        if ask > 0 {
            half.ask = ask;
        }
        if bid_size > 0 {
            half.bid_size = bid_size as u32;
        }
        if ask_size > 0 {
            half.ask_size = ask_size as u32;
        }
        half.last_update_ms = now_ms;

        let changed = half.bid != prev.bid
            || half.ask != prev.ask
            || half.bid_size != prev.bid_size
            || half.ask_size != prev.ask_size;

        if changed {
            snap.dirty = true;
            let symbol = snap.symbol.clone();
            self.dirty.insert(symbol.clone());
            debug!(
                symbol = %symbol,
                venue = %venue,
                bid = half.bid,
                ask = half.ask,
                bid_size = half.bid_size,
                ask_size = half.ask_size,
                "quote updated"
            );
            Some((symbol, venue))
        } else {
            None
        }
    }

    /// Atomically swap the dirty set to empty and clear the dirty flag on the
    /// returned symbols. Each changed symbol appears exactly once per sweep.
    pub fn take_dirty_set(&mut self) -> HashSet<String> {
        let dirty = std::mem::take(&mut self.dirty);
        for symbol in &dirty {
            if let Some(snap) = self.quotes.get_mut(symbol) {
                snap.dirty = false;
            }
        }
        dirty
    }

    pub fn get(&self, symbol: &str) -> Option<&QuoteSnapshot> {
        self.quotes.get(symbol)
    }

    /// Both venues updated within the staleness window and both venues
    /// showing a two-sided quote.
    pub fn is_ready(&self, symbol: &str, now_ms: u64) -> bool {
        let Some(snap) = self.quotes.get(symbol) else {
            return false;
        };
        let fresh = |q: &VenueQuote| {
            q.last_update_ms > 0 && now_ms.saturating_sub(q.last_update_ms) < STALE_AFTER_MS
        };
        fresh(&snap.krx)
            && fresh(&snap.nxt)
            && snap.krx.bid > 0
            && snap.krx.ask > 0
            && snap.nxt.bid > 0
            && snap.nxt.ask > 0
    }

    /// Number of symbols currently ready on both venues.
    pub fn ready_count(&self, now_ms: u64) -> usize {
        self.quotes
            .keys()
            .filter(|s| self.is_ready(s, now_ms))
            .count()
    }

    pub fn symbol_count(&self) -> usize {
        self.quotes.len()
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_fields(bid: &str, ask: &str, bid_size: &str, ask_size: &str) -> HashMap<u16, String> {
        let mut m = HashMap::new();
        m.insert(fid::BID_PRICE, bid.to_string());
        m.insert(fid::ASK_PRICE, ask.to_string());
        m.insert(fid::BID_SIZE, bid_size.to_string());
        m.insert(fid::ASK_SIZE, ask_size.to_string());
        m
    }

    fn book_with(symbols: &[&str]) -> QuoteBook {
        let mut book = QuoteBook::new();
        let syms: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        book.load_universe(&syms, &[101, 102, 103, 104]);
        book
    }

    #[test]
    fn sharding_respects_screen_limit() {
        let symbols: Vec<String> = (0..250).map(|i| format!("{i:06}")).collect();
        let mut book = QuoteBook::new();
        book.load_universe(&symbols, &[101, 102, 103, 104]);

        assert_eq!(book.shards().len(), 3);
        assert_eq!(book.shards()[0].screen, 101);
        assert_eq!(book.shards()[1].screen, 102);
        assert_eq!(book.shards()[2].screen, 103);
        assert!(book.shards().iter().all(|s| s.symbols.len() <= MAX_SYMBOLS_PER_SCREEN));
        assert_eq!(book.shards()[2].symbols.len(), 50);
    }

    #[test]
    fn update_sets_dirty_by_venue_suffix() {
        let mut book = book_with(&["005930"]);

        let changed = book.apply_update("005930", &quote_fields("72000", "72100", "100", "100"), 1);
        assert_eq!(changed, Some(("005930".to_string(), Venue::Krx)));

        let changed =
            book.apply_update("005930_NX", &quote_fields("72,200", "72,300", "50", "50"), 2);
        assert_eq!(changed, Some(("005930".to_string(), Venue::Nxt)));

        let snap = book.get("005930").unwrap();
        assert_eq!(snap.krx.bid, 72_000);
        assert_eq!(snap.krx.ask, 72_100);
        assert_eq!(snap.nxt.bid, 72_200);
        assert_eq!(snap.nxt.ask, 72_300);
        assert!(snap.both_touched());
        assert!(snap.dirty);
    }

    #[test]
    fn duplicate_payload_does_not_redirty() {
        let mut book = book_with(&["005930"]);
        let fields = quote_fields("72000", "72100", "100", "100");

        assert!(book.apply_update("005930", &fields, 1).is_some());
        let dirty = book.take_dirty_set();
        assert_eq!(dirty.len(), 1);

        // Same payload again: values unchanged, no dirty.
        assert!(book.apply_update("005930", &fields, 2).is_none());
        assert!(book.take_dirty_set().is_empty());
    }

    #[test]
    fn take_dirty_set_returns_each_symbol_once() {
        let mut book = book_with(&["005930", "000660"]);
        book.apply_update("005930", &quote_fields("100", "101", "1", "1"), 1);
        book.apply_update("005930", &quote_fields("100", "102", "1", "1"), 1);
        book.apply_update("000660", &quote_fields("200", "201", "1", "1"), 1);

        let dirty = book.take_dirty_set();
        assert_eq!(dirty.len(), 2);
        assert!(book.take_dirty_set().is_empty());
        assert!(!book.get("005930").unwrap().dirty);
    }

    #[test]
    fn nonpositive_fields_keep_previous_values() {
        let mut book = book_with(&["005930"]);
        book.apply_update("005930", &quote_fields("72000", "72100", "100", "100"), 1);

        // Blank ask and zero ask size: both keep previous values; bid moves.
        book.apply_update("005930", &quote_fields("72050", "", "100", "0"), 2);
        let snap = book.get("005930").unwrap();
        assert_eq!(snap.krx.bid, 72_050);
        assert_eq!(snap.krx.ask, 72_100);
        assert_eq!(snap.krx.ask_size, 100);
    }

    #[test]
    fn unknown_code_is_ignored() {
        let mut book = book_with(&["005930"]);
        assert!(book
            .apply_update("999999", &quote_fields("100", "101", "1", "1"), 1)
            .is_none());
        assert!(book.take_dirty_set().is_empty());
    }

    #[test]
    fn readiness_requires_freshness_on_both_venues() {
        let mut book = book_with(&["005930"]);
        book.apply_update("005930", &quote_fields("72000", "72100", "100", "100"), 1_000);
        assert!(!book.is_ready("005930", 1_000)); // NXT never touched

        book.apply_update("005930_NX", &quote_fields("72200", "72300", "50", "50"), 1_000);
        assert!(book.is_ready("005930", 1_000));
        assert!(book.is_ready("005930", 5_500));
        assert!(!book.is_ready("005930", 6_500)); // both stale now
    }
}
