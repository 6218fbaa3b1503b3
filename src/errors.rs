// =============================================================================
// Error taxonomy
// =============================================================================
//
// Every category here is recoverable at pair granularity: a denial drops a
// signal, a submit failure or rejection fails the affected pair. Nothing in
// this module aborts the event loop.
// =============================================================================

use thiserror::Error;

/// Why a token-bucket request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("bucket exhausted")]
    Exhausted,
    #[error("tokens reserved for urgent traffic")]
    Reserved,
    #[error("auto_paused")]
    AutoPaused,
}

/// Failure to get an order onto the wire.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("throttled: {0}")]
    Throttled(DenyReason),
    #[error("send_failed: {0}")]
    SubmitFailed(String),
}

/// Failure to cancel a working order.
#[derive(Debug, Clone, Error)]
pub enum CancelError {
    #[error("unknown client order id {0}")]
    UnknownOrder(u64),
    #[error("order {0} has no broker order id yet")]
    NoBrokerId(u64),
    #[error("throttled: {0}")]
    Throttled(DenyReason),
    #[error("send_failed: {0}")]
    SubmitFailed(String),
}
