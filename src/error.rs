//! Error taxonomy.
//!
//! Recoverable conditions (transport drops, protocol desyncs, stale data,
//! queue overflow) are handled locally and surface as counters and log
//! events; only configuration problems abort engine start.

use crate::types::{BookKey, Venue};
use thiserror::Error;

/// Invalid policy configuration. Fatal at construction: the engine refuses
/// to start rather than run with a nonsensical policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must lie in [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("{field} must be non-zero")]
    ZeroDuration { field: &'static str },

    #[error("{field} for {key} must be positive, got {value}")]
    NonPositiveEntry {
        field: &'static str,
        key: String,
        value: f64,
    },
}

/// Why a book declared itself desynchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncReason {
    /// Delta arrived before any snapshot.
    NotInitialized,
    /// Venue sequence gap: the delta did not follow `last_seq + 1`.
    SequenceGap,
    /// Applying the delta left `best_bid >= best_ask`.
    CrossedBook,
}

impl DesyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesyncReason::NotInitialized => "not_initialized",
            DesyncReason::SequenceGap => "sequence_gap",
            DesyncReason::CrossedBook => "crossed_book",
        }
    }
}

/// Book desynchronization. The book has already cleared itself; the owning
/// adapter must be asked for a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("book desync on {key}: {reason:?} (expected seq {expected:?}, got {got:?})")]
pub struct DesyncError {
    pub key: BookKey,
    pub reason: DesyncReason,
    pub expected: Option<u64>,
    pub got: Option<u64>,
}

/// Failures at the adapter boundary.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{venue} transport unavailable: {detail}")]
    TransportUnavailable { venue: Venue, detail: String },

    #[error("{venue} rejected subscription to {target}: {detail}")]
    SubscriptionFailed {
        venue: Venue,
        target: String,
        detail: String,
    },

    #[error("{venue} adapter is shut down")]
    Closed { venue: Venue },
}

/// Top-level engine failures surfaced to the host.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("engine already started")]
    AlreadyStarted,

    /// Internal invariant violation. In debug builds these surface as
    /// `debug_assert!` panics in the owning task; the dispatcher treats
    /// such a task panic as a failed component. Hosts that catch and
    /// classify task panics report them under this variant.
    #[error("invariant violation: {0}")]
    Fatal(String),
}
