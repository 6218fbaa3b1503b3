// =============================================================================
// Session state — admission window controller
// =============================================================================
//
// State machine: DISARMED -> ARMED -> TRADING -> CLOSING -> DISARMED.
//
// Admission is the conjunction of the configured KRX/NXT overlap window, KRX
// trading hours, and the NXT main-session signal (phase code `R`, or a
// time-based fallback when the signal feed is not trusted). New pairs are
// admitted only while ARMED; CLOSING drains existing pairs and falls back to
// DISARMED once the book is flat.
// =============================================================================

use chrono::NaiveTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SessionConfig;

/// KRX continuous-session hours.
fn krx_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

fn krx_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 20, 0).unwrap()
}

/// Time-based NXT main-session fallback (used when the phase signal is off).
fn nxt_main_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 30).unwrap()
}

fn nxt_main_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 20, 0).unwrap()
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Overall trading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradingState {
    Disarmed,
    Armed,
    Trading,
    Closing,
}

impl std::fmt::Display for TradingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disarmed => write!(f, "DISARMED"),
            Self::Armed => write!(f, "ARMED"),
            Self::Trading => write!(f, "TRADING"),
            Self::Closing => write!(f, "CLOSING"),
        }
    }
}

/// NXT session phases (FID 215 codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NxtPhase {
    PreOpen,
    PreClose,
    MainOpen,
    MainClose,
    AfterStart,
    AfterMid,
    AfterClose,
}

impl NxtPhase {
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'P' => Some(Self::PreOpen),
            'Q' => Some(Self::PreClose),
            'R' => Some(Self::MainOpen),
            'S' => Some(Self::MainClose),
            'T' => Some(Self::AfterStart),
            'U' => Some(Self::AfterMid),
            'V' => Some(Self::AfterClose),
            _ => None,
        }
    }
}

/// Serialisable session summary for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub state: TradingState,
    pub nxt_phase: Option<NxtPhase>,
    pub in_overlap_window: bool,
    pub krx_open: bool,
    pub can_trade: bool,
    pub can_open_new: bool,
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

pub struct SessionState {
    state: TradingState,
    nxt_phase: Option<NxtPhase>,
    overlap_start: NaiveTime,
    overlap_end: NaiveTime,
    use_session_signal: bool,
    arm_only_in_overlap: bool,
}

impl SessionState {
    pub fn new(cfg: &SessionConfig) -> Self {
        let overlap_start = parse_window_time(&cfg.overlap_start).unwrap_or_else(|| {
            warn!(raw = %cfg.overlap_start, "invalid overlap start; using 09:00:32");
            NaiveTime::from_hms_opt(9, 0, 32).unwrap()
        });
        let overlap_end = parse_window_time(&cfg.overlap_end).unwrap_or_else(|| {
            warn!(raw = %cfg.overlap_end, "invalid overlap end; using 15:19:50");
            NaiveTime::from_hms_opt(15, 19, 50).unwrap()
        });

        Self {
            state: TradingState::Disarmed,
            nxt_phase: None,
            overlap_start,
            overlap_end,
            use_session_signal: cfg.use_session_signal,
            arm_only_in_overlap: cfg.arm_only_in_overlap,
        }
    }

    pub fn state(&self) -> TradingState {
        self.state
    }

    pub fn nxt_phase(&self) -> Option<NxtPhase> {
        self.nxt_phase
    }

    /// New pairs may be admitted only while ARMED.
    pub fn can_open_new(&self) -> bool {
        self.state == TradingState::Armed
    }

    /// Existing pairs may keep working while ARMED or TRADING.
    pub fn can_trade(&self) -> bool {
        matches!(self.state, TradingState::Armed | TradingState::Trading)
    }

    pub fn should_close(&self) -> bool {
        self.state == TradingState::Closing
    }

    /// Update the NXT phase from a session-code signal.
    pub fn on_session_phase(&mut self, code: char) {
        match NxtPhase::from_code(code) {
            Some(phase) => {
                if self.nxt_phase != Some(phase) {
                    info!(code = %code, phase = ?phase, "NXT session phase updated");
                }
                self.nxt_phase = Some(phase);
            }
            None => warn!(code = %code, "unknown NXT session phase code"),
        }
    }

    /// First pair admitted: ARMED -> TRADING.
    pub fn note_pair_admitted(&mut self) {
        if self.state == TradingState::Armed {
            self.state = TradingState::Trading;
            info!("trading state: ARMED -> TRADING");
        }
    }

    /// Re-evaluate the state machine. Called once per second with the current
    /// wall time and the number of non-terminal pairs. Returns the new state
    /// when a transition occurred.
    pub fn tick(&mut self, wall: NaiveTime, active_pairs: usize) -> Option<TradingState> {
        let old = self.state;
        let admit = self.admission_holds(wall);

        match self.state {
            TradingState::Disarmed => {
                if admit {
                    self.state = TradingState::Armed;
                }
            }
            TradingState::Armed | TradingState::Trading => {
                if !admit {
                    self.state = TradingState::Closing;
                }
            }
            TradingState::Closing => {
                if active_pairs == 0 {
                    self.state = TradingState::Disarmed;
                }
            }
        }

        if self.state != old {
            info!(from = %old, to = %self.state, "trading state changed");
            Some(self.state)
        } else {
            None
        }
    }

    /// Emergency stop: drop straight to DISARMED.
    pub fn force_disarm(&mut self) {
        let old = self.state;
        self.state = TradingState::Disarmed;
        warn!(from = %old, "trading FORCE DISARMED");
    }

    /// Operator override: arm immediately. Subject to reversal on the next
    /// tick unless the overlap gate is disabled.
    pub fn manual_arm(&mut self) {
        if self.state == TradingState::Disarmed {
            self.state = TradingState::Armed;
            info!("trading MANUALLY ARMED");
        }
    }

    /// Admission = overlap window AND KRX hours AND NXT main session.
    fn admission_holds(&self, wall: NaiveTime) -> bool {
        if !self.arm_only_in_overlap {
            return true;
        }
        if wall < self.overlap_start || wall > self.overlap_end {
            return false;
        }
        if wall < krx_open() || wall > krx_close() {
            return false;
        }
        if self.use_session_signal {
            self.nxt_phase == Some(NxtPhase::MainOpen)
        } else {
            wall >= nxt_main_open() && wall <= nxt_main_close()
        }
    }

    pub fn info(&self, wall: NaiveTime) -> SessionInfo {
        SessionInfo {
            state: self.state,
            nxt_phase: self.nxt_phase,
            in_overlap_window: wall >= self.overlap_start && wall <= self.overlap_end,
            krx_open: wall >= krx_open() && wall <= krx_close(),
            can_trade: self.can_trade(),
            can_open_new: self.can_open_new(),
        }
    }
}

fn parse_window_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S").ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
