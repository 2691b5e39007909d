//! Venue adapter contract.
//!
//! An adapter owns the venue transport (out of scope here) and hands the
//! core already-normalized `MarketEvent`s over a bounded channel. The
//! dispatcher owns every adapter instance; adapters never call back into
//! the engine and never hold pointers to it.
//!
//! Delivery contract: events for one `BookKey` arrive in the venue's order
//! of receipt; across keys no ordering is guaranteed. Malformed venue
//! messages are dropped at the adapter boundary and never reach the core.

use crate::error::AdapterError;
use crate::types::{BookKey, ConnectionState, InstrumentKind, MarketEvent, Venue};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Default bound on an adapter's event channel. One second of burst at a
/// few thousand updates per second before ingest back-pressure applies.
pub const EVENT_CHANNEL_CAPACITY: usize = 4_096;

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    /// Establish the venue session. Idempotent: connecting a connected
    /// adapter is a no-op. Transitions are reported both via `state()` and
    /// as `StateChange` events on the stream.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Tear down the venue session. Idempotent.
    async fn disconnect(&self);

    async fn subscribe_book(&self, symbol: &str, kind: InstrumentKind)
        -> Result<(), AdapterError>;
    async fn subscribe_trades(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Result<(), AdapterError>;
    async fn subscribe_ticker(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Result<(), AdapterError>;
    async fn subscribe_funding(&self, symbol: &str) -> Result<(), AdapterError>;

    async fn unsubscribe(&self, symbol: &str, kind: InstrumentKind) -> Result<(), AdapterError>;
    async fn unsubscribe_all(&self) -> Result<(), AdapterError>;

    /// Ask the venue for a fresh book snapshot after a desync. The snapshot
    /// arrives later as a `BookSnapshot` event on the stream.
    async fn request_snapshot(&self, key: &BookKey) -> Result<(), AdapterError>;

    fn state(&self) -> ConnectionState;

    /// Hand the event stream to the caller. Yields `Some` exactly once;
    /// the dispatcher takes it when the adapter is added.
    fn take_event_stream(&mut self) -> Option<mpsc::Receiver<MarketEvent>>;
}
