// =============================================================================
// Clock abstraction — monotonic deadlines + wall-clock session gating
// =============================================================================
//
// All deadline arithmetic in the engine works on monotonic milliseconds so
// that timeouts are immune to wall-clock adjustments. The session admission
// window is the one consumer of wall time. `SimClock` lets tests drive both
// deterministically.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveTime, Timelike};
use parking_lot::Mutex;

/// Time source for the engine.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    /// Local wall-clock time of day (drives the session admission window).
    fn wall_time(&self) -> NaiveTime;
}

pub type SharedClock = Arc<dyn Clock>;

/// Production clock: `Instant`-based monotonic time, `chrono::Local` wall time.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Deterministic clock for tests and replay. Monotonic time advances only via
/// [`SimClock::advance`]; wall time is set explicitly.
pub struct SimClock {
    ms: AtomicU64,
    wall: Mutex<NaiveTime>,
}

impl SimClock {
    /// Start at t=0 with a mid-session wall time.
    pub fn new() -> Self {
        Self {
            ms: AtomicU64::new(0),
            wall: Mutex::new(NaiveTime::from_hms_opt(10, 30, 0).unwrap()),
        }
    }

    /// Advance monotonic time by `delta_ms`, keeping wall time in step.
    pub fn advance(&self, delta_ms: u64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
        let mut wall = self.wall.lock();
        let secs = wall.num_seconds_from_midnight() as u64 * 1000
            + (wall.nanosecond() / 1_000_000) as u64
            + delta_ms;
        *wall = NaiveTime::from_num_seconds_from_midnight_opt(
            ((secs / 1000) % 86_400) as u32,
            ((secs % 1000) * 1_000_000) as u32,
        )
        .unwrap();
    }

    /// Pin the wall clock to a specific time of day.
    pub fn set_wall(&self, t: NaiveTime) {
        *self.wall.lock() = t;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }

    fn wall_time(&self) -> NaiveTime {
        *self.wall.lock()
    }
}
