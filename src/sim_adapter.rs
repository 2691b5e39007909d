//! Scripted in-memory venue adapter.
//!
//! `SimAdapter` fulfills the `VenueAdapter` contract without any network:
//! tests and the demo binary push normalized events through a `SimFeed`
//! handle and the adapter relays them to the dispatcher. Snapshot requests
//! are recorded and, when a canned snapshot is registered for the key,
//! answered on the stream like a real venue would.

use crate::adapter::{VenueAdapter, EVENT_CHANNEL_CAPACITY};
use crate::error::AdapterError;
use crate::types::{
    BookKey, ConnectionState, FundingRecord, InstrumentKind, MarketEvent, PriceLevel, Ticker,
    Venue,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct SimShared {
    venue: Venue,
    tx: mpsc::Sender<MarketEvent>,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<HashSet<(String, InstrumentKind)>>,
    snapshot_requests: AtomicU64,
    requested_keys: Mutex<Vec<BookKey>>,
    canned_snapshots: Mutex<HashMap<BookKey, CannedSnapshot>>,
    fail_connect: AtomicBool,
}

#[derive(Clone)]
struct CannedSnapshot {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    seq: Option<u64>,
    timestamp_us: u64,
}

impl SimShared {
    async fn emit(&self, event: MarketEvent) {
        // Receiver gone means the dispatcher shut down; nothing to do.
        let _ = self.tx.send(event).await;
    }

    async fn set_state(&self, state: ConnectionState, reason: Option<String>) {
        *self.state.lock() = state;
        self.emit(MarketEvent::StateChange {
            venue: self.venue,
            state,
            reason,
        })
        .await;
    }
}

pub struct SimAdapter {
    shared: Arc<SimShared>,
    rx: Option<mpsc::Receiver<MarketEvent>>,
}

impl SimAdapter {
    pub fn new(venue: Venue) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SimShared {
                venue,
                tx,
                state: Mutex::new(ConnectionState::Disconnected),
                subscriptions: Mutex::new(HashSet::new()),
                snapshot_requests: AtomicU64::new(0),
                requested_keys: Mutex::new(Vec::new()),
                canned_snapshots: Mutex::new(HashMap::new()),
                fail_connect: AtomicBool::new(false),
            }),
            rx: Some(rx),
        }
    }

    /// Script handle for pushing events and inspecting adapter activity.
    /// Keep it before handing the adapter to the dispatcher.
    pub fn feed(&self) -> SimFeed {
        SimFeed {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl VenueAdapter for SimAdapter {
    fn venue(&self) -> Venue {
        self.shared.venue
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        if *self.shared.state.lock() == ConnectionState::Connected {
            return Ok(());
        }
        if self.shared.fail_connect.load(Ordering::Relaxed) {
            self.shared
                .set_state(
                    ConnectionState::Disconnected,
                    Some("simulated transport failure".to_string()),
                )
                .await;
            return Err(AdapterError::TransportUnavailable {
                venue: self.shared.venue,
                detail: "simulated transport failure".to_string(),
            });
        }
        self.shared
            .set_state(ConnectionState::Connecting, None)
            .await;
        self.shared
            .set_state(ConnectionState::Connected, None)
            .await;
        Ok(())
    }

    async fn disconnect(&self) {
        if *self.shared.state.lock() == ConnectionState::Disconnected {
            return;
        }
        self.shared
            .set_state(ConnectionState::Disconnected, None)
            .await;
    }

    async fn subscribe_book(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Result<(), AdapterError> {
        self.shared
            .subscriptions
            .lock()
            .insert((symbol.to_string(), kind));
        Ok(())
    }

    async fn subscribe_trades(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Result<(), AdapterError> {
        self.shared
            .subscriptions
            .lock()
            .insert((symbol.to_string(), kind));
        Ok(())
    }

    async fn subscribe_ticker(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Result<(), AdapterError> {
        self.shared
            .subscriptions
            .lock()
            .insert((symbol.to_string(), kind));
        Ok(())
    }

    async fn subscribe_funding(&self, symbol: &str) -> Result<(), AdapterError> {
        self.shared
            .subscriptions
            .lock()
            .insert((symbol.to_string(), InstrumentKind::Perpetual));
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &str, kind: InstrumentKind) -> Result<(), AdapterError> {
        self.shared
            .subscriptions
            .lock()
            .remove(&(symbol.to_string(), kind));
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), AdapterError> {
        self.shared.subscriptions.lock().clear();
        Ok(())
    }

    async fn request_snapshot(&self, key: &BookKey) -> Result<(), AdapterError> {
        self.shared.snapshot_requests.fetch_add(1, Ordering::Relaxed);
        self.shared.requested_keys.lock().push(key.clone());

        let canned = self.shared.canned_snapshots.lock().get(key).cloned();
        if let Some(snapshot) = canned {
            self.shared
                .emit(MarketEvent::BookSnapshot {
                    key: key.clone(),
                    bids: snapshot.bids,
                    asks: snapshot.asks,
                    seq: snapshot.seq,
                    timestamp_us: snapshot.timestamp_us,
                })
                .await;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    fn take_event_stream(&mut self) -> Option<mpsc::Receiver<MarketEvent>> {
        self.rx.take()
    }
}

/// Cloneable script handle bound to one `SimAdapter`.
#[derive(Clone)]
pub struct SimFeed {
    shared: Arc<SimShared>,
}

impl SimFeed {
    pub async fn send(&self, event: MarketEvent) {
        self.shared.emit(event).await;
    }

    pub async fn book_snapshot(
        &self,
        key: BookKey,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        seq: Option<u64>,
        timestamp_us: u64,
    ) {
        self.shared
            .emit(MarketEvent::BookSnapshot {
                key,
                bids,
                asks,
                seq,
                timestamp_us,
            })
            .await;
    }

    pub async fn book_delta(
        &self,
        key: BookKey,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        seq: Option<u64>,
        timestamp_us: u64,
    ) {
        self.shared
            .emit(MarketEvent::BookDelta {
                key,
                bids,
                asks,
                seq,
                timestamp_us,
            })
            .await;
    }

    pub async fn ticker(&self, key: BookKey, ticker: Ticker) {
        self.shared.emit(MarketEvent::TickerUpdate { key, ticker }).await;
    }

    pub async fn funding(&self, key: BookKey, funding: FundingRecord) {
        self.shared.emit(MarketEvent::FundingUpdate { key, funding }).await;
    }

    pub async fn state_change(&self, state: ConnectionState, reason: Option<String>) {
        self.shared.set_state(state, reason).await;
    }

    /// Register the snapshot the adapter will replay for resync requests
    /// on `key`.
    pub fn set_snapshot_response(
        &self,
        key: BookKey,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        seq: Option<u64>,
        timestamp_us: u64,
    ) {
        self.shared.canned_snapshots.lock().insert(
            key,
            CannedSnapshot {
                bids,
                asks,
                seq,
                timestamp_us,
            },
        );
    }

    /// Make the next `connect()` calls fail with `TransportUnavailable`.
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::Relaxed);
    }

    pub fn snapshot_requests(&self) -> u64 {
        self.shared.snapshot_requests.load(Ordering::Relaxed)
    }

    pub fn requested_keys(&self) -> Vec<BookKey> {
        self.shared.requested_keys.lock().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }

    pub fn is_subscribed(&self, symbol: &str, kind: InstrumentKind) -> bool {
        self.shared
            .subscriptions
            .lock()
            .contains(&(symbol.to_string(), kind))
    }
}
