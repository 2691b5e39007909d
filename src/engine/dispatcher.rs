//! Adapter ownership and lifecycle.
//!
//! The dispatcher is the top-level lifecycle owner: it holds every venue
//! adapter, runs one ingest worker per adapter (the only writer for that
//! venue's partition of the index), supervises reconnects, and owns the
//! cancellation signal that the detector and consumer tasks observe.
//!
//! Desync handling: when a book rejects a delta the worker asks the
//! adapter for a fresh snapshot and moves on; the venue's keys stay out
//! of aggregation until the snapshot lands. A venue that exhausts its
//! reconnect budget is marked failed and its keys are removed entirely.

use crate::adapter::VenueAdapter;
use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::engine::counters::EngineCounters;
use crate::error::EngineError;
use crate::market::index::MarketIndex;
use crate::types::{ConnectionState, InstrumentKind, MarketEvent, Symbol, Venue};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One-shot cancellation signal shared by every engine task.
///
/// Triggering is sticky until `reset`; tasks either observe the flag or
/// are woken by the notify, never miss both.
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolve once triggered. The notified future is registered before
    /// the flag check, so a trigger between the two is not lost.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

struct AdapterEntry {
    adapter: Arc<dyn VenueAdapter>,
    events: Option<mpsc::Receiver<MarketEvent>>,
}

pub struct Dispatcher {
    index: Arc<MarketIndex>,
    config: Arc<PolicyConfig>,
    counters: Arc<EngineCounters>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Shutdown>,
    adapters: Mutex<HashMap<Venue, AdapterEntry>>,
    subscriptions: Mutex<Vec<(Symbol, InstrumentKind)>>,
    failed_venues: Arc<Mutex<HashSet<Venue>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stop_lock: tokio::sync::Mutex<()>,
    started: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        index: Arc<MarketIndex>,
        clock: Arc<dyn Clock>,
        config: Arc<PolicyConfig>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            index,
            config,
            counters,
            clock,
            shutdown: Arc::new(Shutdown::new()),
            adapters: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            failed_venues: Arc::new(Mutex::new(HashSet::new())),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            stop_lock: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
        }
    }

    /// Cancellation handle for the detector and host consumer tasks.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Register an adapter. Its event stream is taken here; adapters
    /// added after `start` are picked up on the next start.
    pub fn add_adapter(&self, mut adapter: Box<dyn VenueAdapter>) {
        let events = adapter.take_event_stream();
        let venue = adapter.venue();
        if events.is_none() {
            warn!(%venue, "adapter handed over without an event stream");
        }
        let adapter: Arc<dyn VenueAdapter> = Arc::from(adapter);
        self.adapters
            .lock()
            .insert(venue, AdapterEntry { adapter, events });
    }

    /// Drop an adapter and every index key of its venue.
    pub async fn remove_adapter(&self, venue: Venue) {
        let entry = self.adapters.lock().remove(&venue);
        if let Some(entry) = entry {
            entry.adapter.disconnect().await;
        }
        self.failed_venues.lock().remove(&venue);
        let removed = self.index.remove_venue(venue);
        info!(%venue, removed_keys = removed, "adapter removed");
    }

    /// Subscribe book, ticker and (for perpetuals) funding streams on
    /// every registered adapter. Per-venue failures are logged and do not
    /// stop the fan-out.
    pub async fn subscribe_all_venues(&self, symbol: &str, kind: InstrumentKind) {
        self.subscriptions
            .lock()
            .push((symbol.to_string(), kind));

        let adapters: Vec<Arc<dyn VenueAdapter>> = self
            .adapters
            .lock()
            .values()
            .map(|e| Arc::clone(&e.adapter))
            .collect();

        for adapter in adapters {
            let venue = adapter.venue();
            if let Err(err) = adapter.subscribe_book(symbol, kind).await {
                warn!(%venue, symbol, %err, "book subscription failed");
                continue;
            }
            if let Err(err) = adapter.subscribe_ticker(symbol, kind).await {
                warn!(%venue, symbol, %err, "ticker subscription failed");
            }
            if kind == InstrumentKind::Perpetual {
                if let Err(err) = adapter.subscribe_funding(symbol).await {
                    warn!(%venue, symbol, %err, "funding subscription failed");
                }
            }
        }
    }

    /// Undo every `subscribe_all_venues` call: adapters drop their
    /// subscriptions and the index sheds the affected keys.
    pub async fn unsubscribe_all(&self) {
        let subscriptions: Vec<(Symbol, InstrumentKind)> =
            std::mem::take(&mut *self.subscriptions.lock());
        let adapters: Vec<Arc<dyn VenueAdapter>> = self
            .adapters
            .lock()
            .values()
            .map(|e| Arc::clone(&e.adapter))
            .collect();

        for adapter in &adapters {
            if let Err(err) = adapter.unsubscribe_all().await {
                warn!(venue = %adapter.venue(), %err, "unsubscribe failed");
            }
        }
        for (symbol, kind) in subscriptions {
            for adapter in &adapters {
                let key = crate::types::BookKey::new(adapter.venue(), symbol.clone(), kind);
                self.index.remove_key(&key);
            }
        }
    }

    /// Connect every adapter and spawn its ingest worker and supervisor.
    /// Idempotent: a second `start` while running is a no-op.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.reset();
        info!("dispatcher starting");

        let venues: Vec<Venue> = self.adapters.lock().keys().copied().collect();
        for venue in venues {
            let (adapter, events) = {
                let mut adapters = self.adapters.lock();
                let entry = match adapters.get_mut(&venue) {
                    Some(entry) => entry,
                    None => continue,
                };
                (Arc::clone(&entry.adapter), entry.events.take())
            };

            let (reconnect_tx, reconnect_rx) = mpsc::channel::<()>(4);

            if let Err(err) = adapter.connect().await {
                warn!(%venue, %err, "initial connect failed, scheduling retry");
                let _ = reconnect_tx.try_send(());
            }

            let mut handles = self.tasks.lock().await;
            if let Some(events) = events {
                handles.push(tokio::spawn(ingest_worker(
                    venue,
                    Arc::clone(&adapter),
                    events,
                    Arc::clone(&self.index),
                    Arc::clone(&self.counters),
                    Arc::clone(&self.shutdown),
                    reconnect_tx.clone(),
                )));
            }
            handles.push(tokio::spawn(supervisor(
                venue,
                adapter,
                reconnect_rx,
                Arc::clone(&self.index),
                Arc::clone(&self.config),
                Arc::clone(&self.counters),
                Arc::clone(&self.shutdown),
                Arc::clone(&self.failed_venues),
                self.subscriptions_snapshot(),
            )));
        }
        Ok(())
    }

    /// Disconnect adapters, cancel all tasks, drain in-flight events and
    /// clear the market view. Idempotent; a concurrent second `stop`
    /// waits for the first to finish.
    pub async fn stop(&self) {
        let _guard = self.stop_lock.lock().await;
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        info!("dispatcher stopping");
        self.shutdown.trigger();

        let adapters: Vec<Arc<dyn VenueAdapter>> = self
            .adapters
            .lock()
            .values()
            .map(|e| Arc::clone(&e.adapter))
            .collect();
        for adapter in &adapters {
            adapter.disconnect().await;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
        futures_util::future::join_all(handles).await;

        // The engine is volatile: a stopped engine holds no market state.
        for adapter in &adapters {
            self.index.remove_venue(adapter.venue());
        }
        self.started.store(false, Ordering::SeqCst);
        info!("dispatcher stopped");
    }

    /// Connection state per venue, with supervision overrides applied.
    pub fn state(&self) -> HashMap<Venue, ConnectionState> {
        let failed = self.failed_venues.lock();
        self.adapters
            .lock()
            .iter()
            .map(|(venue, entry)| {
                let state = if failed.contains(venue) {
                    ConnectionState::Failed
                } else {
                    entry.adapter.state()
                };
                (*venue, state)
            })
            .collect()
    }

    /// Venues currently delivering data.
    pub fn healthy_venues(&self) -> Vec<Venue> {
        self.state()
            .into_iter()
            .filter(|(_, s)| *s == ConnectionState::Connected)
            .map(|(v, _)| v)
            .collect()
    }

    pub fn uptime_us(&self) -> u64 {
        self.clock.mono_us()
    }

    fn subscriptions_snapshot(&self) -> Vec<(Symbol, InstrumentKind)> {
        self.subscriptions.lock().clone()
    }
}

/// One ingest worker per adapter: the single writer for that venue's
/// partition of the index.
async fn ingest_worker(
    venue: Venue,
    adapter: Arc<dyn VenueAdapter>,
    mut events: mpsc::Receiver<MarketEvent>,
    index: Arc<MarketIndex>,
    counters: Arc<EngineCounters>,
    shutdown: Arc<Shutdown>,
    reconnect_tx: mpsc::Sender<()>,
) {
    debug!(%venue, "ingest worker started");
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            maybe = events.recv() => match maybe {
                Some(event) => {
                    handle_event(venue, &adapter, &index, &counters, &reconnect_tx, event).await;
                }
                None => break,
            }
        }
    }
    // Finish the current unit of work: drain whatever is already queued.
    while let Ok(event) = events.try_recv() {
        handle_event(venue, &adapter, &index, &counters, &reconnect_tx, event).await;
    }
    debug!(%venue, "ingest worker stopped");
}

async fn handle_event(
    venue: Venue,
    adapter: &Arc<dyn VenueAdapter>,
    index: &Arc<MarketIndex>,
    counters: &Arc<EngineCounters>,
    reconnect_tx: &mpsc::Sender<()>,
    event: MarketEvent,
) {
    counters.incr_events_ingested();
    match event {
        MarketEvent::BookSnapshot {
            key,
            bids,
            asks,
            seq,
            timestamp_us,
        } => {
            if key.venue != venue {
                warn!(%venue, event_key = %key, "event crossed venue partition, dropped");
                return;
            }
            let outcome = index.apply_book_snapshot(&key, &bids, &asks, seq, timestamp_us);
            if outcome == crate::market::book::SnapshotOutcome::StaleDiscarded {
                warn!(%key, "out-of-order snapshot discarded");
            }
        }
        MarketEvent::BookDelta {
            key,
            bids,
            asks,
            seq,
            timestamp_us,
        } => {
            if key.venue != venue {
                warn!(%venue, event_key = %key, "event crossed venue partition, dropped");
                return;
            }
            if let Err(desync) = index.apply_book_delta(&key, &bids, &asks, seq, timestamp_us) {
                counters.incr_desyncs();
                warn!(
                    %key,
                    reason = desync.reason.as_str(),
                    expected = ?desync.expected,
                    got = ?desync.got,
                    "book desync, requesting snapshot"
                );
                counters.incr_resync_requests();
                if let Err(err) = adapter.request_snapshot(&key).await {
                    warn!(%key, %err, "snapshot request failed");
                }
            }
        }
        MarketEvent::TickerUpdate { key, ticker } => {
            if key.venue != venue {
                warn!(%venue, event_key = %key, "event crossed venue partition, dropped");
                return;
            }
            index.upsert_ticker(&key, ticker);
        }
        MarketEvent::Trade { key, trade } => {
            index.record_trade(&key, trade);
        }
        MarketEvent::FundingUpdate { key, funding } => {
            index.upsert_funding(&key, funding);
        }
        MarketEvent::StateChange {
            venue: event_venue,
            state,
            reason,
        } => {
            info!(venue = %event_venue, %state, ?reason, "venue state change");
            if matches!(
                state,
                ConnectionState::Disconnected
                    | ConnectionState::Reconnecting
                    | ConnectionState::Failed
            ) {
                let _ = reconnect_tx.try_send(());
            }
        }
    }
}

/// Reconnect supervision for one adapter: jittered exponential backoff up
/// to the attempt cap, then the venue is marked failed and withdrawn.
#[allow(clippy::too_many_arguments)]
async fn supervisor(
    venue: Venue,
    adapter: Arc<dyn VenueAdapter>,
    mut reconnect_rx: mpsc::Receiver<()>,
    index: Arc<MarketIndex>,
    config: Arc<PolicyConfig>,
    counters: Arc<EngineCounters>,
    shutdown: Arc<Shutdown>,
    failed_venues: Arc<Mutex<HashSet<Venue>>>,
    subscriptions: Vec<(Symbol, InstrumentKind)>,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            maybe = reconnect_rx.recv() => {
                if maybe.is_none() {
                    break;
                }
            }
        }
        if shutdown.is_triggered() {
            break;
        }
        if adapter.state() == ConnectionState::Connected {
            continue;
        }

        let mut backoff_ms = config.reconnect_base_ms;
        let mut attempts = 0u32;
        loop {
            if shutdown.is_triggered() {
                return;
            }
            attempts += 1;
            if attempts > config.max_reconnect_attempts {
                warn!(%venue, attempts, "reconnect budget exhausted, marking venue failed");
                failed_venues.lock().insert(venue);
                index.remove_venue(venue);
                return;
            }

            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 4);
            tokio::select! {
                _ = shutdown.wait() => return,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)) => {}
            }

            match adapter.connect().await {
                Ok(()) => {
                    counters.incr_reconnects();
                    info!(%venue, attempts, "reconnected");
                    // Pending subscriptions are re-issued on the fresh
                    // session.
                    for (symbol, kind) in &subscriptions {
                        let _ = adapter.subscribe_book(symbol, *kind).await;
                        let _ = adapter.subscribe_ticker(symbol, *kind).await;
                        if *kind == InstrumentKind::Perpetual {
                            let _ = adapter.subscribe_funding(symbol).await;
                        }
                    }
                    break;
                }
                Err(err) => {
                    debug!(%venue, attempt = attempts, %err, "reconnect attempt failed");
                    backoff_ms = (backoff_ms * 2).min(config.reconnect_max_ms);
                }
            }
        }
    }
}
