// =============================================================================
// Halt tracker — real-time volatility-interruption (VI) state
// =============================================================================
//
// KRX halts a symbol for a few minutes when its price moves too fast. The
// broker exposes the current halt list through a TR query and streams
// engage/release events afterwards. This module keeps the in-memory set of
// halted symbols; the sweep consults it so the engine never signals into a
// halted name.
// =============================================================================

use std::collections::HashSet;

use tracing::{debug, info};

use crate::venue;

/// In-memory set of symbols currently under a volatility-interruption halt.
pub struct HaltTracker {
    halted: HashSet<String>,
}

impl HaltTracker {
    pub fn new() -> Self {
        Self {
            halted: HashSet::new(),
        }
    }

    /// True if `symbol` is currently halted.
    pub fn is_halted(&self, symbol: &str) -> bool {
        self.halted.contains(symbol)
    }

    pub fn halted_count(&self) -> usize {
        self.halted.len()
    }

    /// Replace the halt set from a TR snapshot. Codes may arrive with the
    /// venue suffix; halts apply to the symbol on both venues.
    pub fn apply_snapshot(&mut self, codes: &[String]) {
        let new_set: HashSet<String> = codes
            .iter()
            .map(|c| venue::split_code(c.trim()).0.to_string())
            .filter(|c| !c.is_empty())
            .collect();

        for symbol in new_set.difference(&self.halted) {
            debug!(symbol = %symbol, "symbol halted (snapshot)");
        }
        for symbol in self.halted.difference(&new_set) {
            debug!(symbol = %symbol, "symbol halt released (snapshot)");
        }

        self.halted = new_set;
        info!(halted = self.halted.len(), "halt list loaded");
    }

    /// Apply a real-time halt engage/release event. Returns true if the
    /// symbol's status actually changed.
    pub fn apply_event(&mut self, code: &str, halted: bool) -> bool {
        let (symbol, _) = venue::split_code(code.trim());
        if symbol.is_empty() {
            return false;
        }

        let changed = if halted {
            self.halted.insert(symbol.to_string())
        } else {
            self.halted.remove(symbol)
        };

        if changed {
            info!(symbol = %symbol, halted, "halt status changed");
        }
        changed
    }
}

impl Default for HaltTracker {
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

    #[test]
    fn snapshot_replaces_the_halt_set() {
        let mut halts = HaltTracker::new();
        halts.apply_snapshot(&["005930".to_string(), "000660".to_string()]);
        assert!(halts.is_halted("005930"));
        assert!(halts.is_halted("000660"));
        assert_eq!(halts.halted_count(), 2);

        // A later snapshot fully replaces: 000660 released, 035420 engaged.
        halts.apply_snapshot(&["005930".to_string(), "035420".to_string()]);
        assert!(halts.is_halted("005930"));
        assert!(!halts.is_halted("000660"));
        assert!(halts.is_halted("035420"));
    }

    #[test]
    fn events_flip_status_and_report_change() {
        let mut halts = HaltTracker::new();

        assert!(halts.apply_event("005930", true));
        assert!(halts.is_halted("005930"));
        // Redundant engage is a no-op.
        assert!(!halts.apply_event("005930", true));

        assert!(halts.apply_event("005930", false));
        assert!(!halts.is_halted("005930"));
        // Redundant release too.
        assert!(!halts.apply_event("005930", false));
    }

    #[test]
    fn venue_suffix_is_normalised() {
        let mut halts = HaltTracker::new();
        halts.apply_event("005930_NX", true);
        assert!(halts.is_halted("005930"));

        halts.apply_snapshot(&["000660_NX".to_string()]);
        assert!(halts.is_halted("000660"));
        assert!(!halts.is_halted("005930"));
    }
}
