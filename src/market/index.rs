//! Concurrent cross-venue market index.
//!
//! Maps `(venue, symbol, kind)` to the ticker, order book and top-of-book
//! cell for that market. The map is sharded (`DashMap`): readers proceed
//! concurrently, writes serialize per key, and nothing holds a lock longer
//! than one copy. Each key is written only by the ingest worker of its
//! venue, so per-key reads are linearizable; cross-key aggregation is
//! snapshot-consistent per key but tolerates sub-millisecond skew between
//! venues.

use crate::error::DesyncError;
use crate::market::book::{BookView, OrderBook, SnapshotOutcome};
use crate::market::top_of_book::{TopOfBook, TopOfBookQuote};
use crate::types::{
    approx_eq, BookKey, FundingRecord, InstrumentKind, PriceLevel, Symbol, Ticker, Trade, Venue,
    EPSILON,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

struct MarketEntry {
    ticker: Option<Ticker>,
    funding: Option<FundingRecord>,
    book: OrderBook,
    tob: Arc<TopOfBook>,
}

impl MarketEntry {
    fn new(key: BookKey) -> Self {
        Self {
            ticker: None,
            funding: None,
            book: OrderBook::new(key),
            tob: Arc::new(TopOfBook::new()),
        }
    }

    /// Freshest update time across ticker and book, microseconds.
    fn last_update_us(&self) -> u64 {
        let ticker_us = self.ticker.map(|t| t.timestamp_us).unwrap_or(0);
        ticker_us.max(self.book.last_update_us())
    }
}

/// Best bid and ask for one (symbol, kind) across all venues carrying it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestAcrossVenues {
    pub best_bid: f64,
    pub best_bid_venue: Venue,
    pub best_bid_size: f64,
    pub best_ask: f64,
    pub best_ask_venue: Venue,
    pub best_ask_size: f64,
}

pub struct MarketIndex {
    entries: DashMap<BookKey, MarketEntry>,
}

impl MarketIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Write path (one ingest worker per venue partition)
    // ------------------------------------------------------------------

    pub fn upsert_ticker(&self, key: &BookKey, ticker: Ticker) {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| MarketEntry::new(key.clone()));
        entry.ticker = Some(ticker);
        entry.tob.publish(TopOfBookQuote {
            bid: ticker.bid,
            ask: ticker.ask,
            bid_size: ticker.bid_size,
            ask_size: ticker.ask_size,
            timestamp_us: ticker.timestamp_us,
        });
    }

    /// Update last-trade statistics. No book side effect.
    pub fn record_trade(&self, key: &BookKey, trade: Trade) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Some(ticker) = entry.ticker.as_mut() {
                ticker.last = trade.price;
            }
        }
    }

    pub fn upsert_funding(&self, key: &BookKey, funding: FundingRecord) {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| MarketEntry::new(key.clone()));
        entry.funding = Some(funding);
        if let Some(ticker) = entry.ticker.as_mut() {
            ticker.funding_rate = Some(funding.rate);
        }
    }

    /// Apply a book snapshot, creating the book on first use.
    pub fn apply_book_snapshot(
        &self,
        key: &BookKey,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: Option<u64>,
        timestamp_us: u64,
    ) -> SnapshotOutcome {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| MarketEntry::new(key.clone()));
        let outcome = entry.book.apply_snapshot(bids, asks, seq, timestamp_us);
        if outcome == SnapshotOutcome::Applied {
            Self::publish_book_top(&entry, timestamp_us);
        }
        outcome
    }

    /// Apply a book delta. A delta for an unknown key is a desync (the
    /// snapshot never arrived here).
    pub fn apply_book_delta(
        &self,
        key: &BookKey,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: Option<u64>,
        timestamp_us: u64,
    ) -> Result<(), DesyncError> {
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| MarketEntry::new(key.clone()));
        match entry.book.apply_delta(bids, asks, seq, timestamp_us) {
            Ok(()) => {
                Self::publish_book_top(&entry, timestamp_us);
                Ok(())
            }
            Err(desync) => {
                // The book cleared itself; withdraw this venue from
                // aggregation until a fresh snapshot or ticker arrives.
                entry.tob.publish(TopOfBookQuote {
                    bid: 0.0,
                    ask: 0.0,
                    bid_size: 0.0,
                    ask_size: 0.0,
                    timestamp_us,
                });
                Err(desync)
            }
        }
    }

    fn publish_book_top(entry: &MarketEntry, timestamp_us: u64) {
        let bid = entry.book.best_bid();
        let ask = entry.book.best_ask();
        entry.tob.publish(TopOfBookQuote {
            bid: bid.map(|l| l.price).unwrap_or(0.0),
            ask: ask.map(|l| l.price).unwrap_or(0.0),
            bid_size: bid.map(|l| l.quantity).unwrap_or(0.0),
            ask_size: ask.map(|l| l.quantity).unwrap_or(0.0),
            timestamp_us,
        });
    }

    // ------------------------------------------------------------------
    // Read path (detector task)
    // ------------------------------------------------------------------

    pub fn get_ticker(&self, key: &BookKey) -> Option<Ticker> {
        self.entries.get(key).and_then(|e| e.ticker)
    }

    pub fn get_book_view(&self, key: &BookKey) -> Option<BookView> {
        self.entries.get(key).map(|e| e.book.snapshot())
    }

    /// Latest published top-of-book for a key. Lock-free once the entry
    /// reference is resolved.
    pub fn get_top_of_book(&self, key: &BookKey) -> Option<TopOfBookQuote> {
        self.entries.get(key).and_then(|e| e.tob.read())
    }

    pub fn get_funding(&self, key: &BookKey) -> Option<FundingRecord> {
        self.entries.get(key).and_then(|e| e.funding)
    }

    /// Mid price for a key, ticker first, book as fallback.
    pub fn mid(&self, key: &BookKey) -> Option<f64> {
        let entry = self.entries.get(key)?;
        if let Some(ticker) = entry.ticker {
            if ticker.is_quoted() {
                return Some(ticker.mid());
            }
        }
        entry.book.mid()
    }

    /// Highest bid and lowest ask for `(symbol, kind)` across venues.
    ///
    /// Ties on price prefer the larger size, then the fixed venue
    /// ordering. Each venue's quote is read torn-free from its seqlock
    /// cell; the combination across venues is not globally atomic.
    pub fn best_across_venues(
        &self,
        symbol: &str,
        kind: InstrumentKind,
    ) -> Option<BestAcrossVenues> {
        let mut best_bid: Option<(f64, f64, Venue)> = None;
        let mut best_ask: Option<(f64, f64, Venue)> = None;

        for entry in self.entries.iter() {
            let key = entry.key();
            if key.symbol != symbol || key.kind != kind {
                continue;
            }
            let Some(quote) = entry.tob.read() else {
                continue;
            };

            if quote.bid > 0.0 {
                let candidate = (quote.bid, quote.bid_size, key.venue);
                best_bid = Some(match best_bid {
                    None => candidate,
                    Some(current) => pick_better(candidate, current, true),
                });
            }
            if quote.ask > 0.0 {
                let candidate = (quote.ask, quote.ask_size, key.venue);
                best_ask = Some(match best_ask {
                    None => candidate,
                    Some(current) => pick_better(candidate, current, false),
                });
            }
        }

        match (best_bid, best_ask) {
            (Some((bid, bid_size, bid_venue)), Some((ask, ask_size, ask_venue))) => {
                Some(BestAcrossVenues {
                    best_bid: bid,
                    best_bid_venue: bid_venue,
                    best_bid_size: bid_size,
                    best_ask: ask,
                    best_ask_venue: ask_venue,
                    best_ask_size: ask_size,
                })
            }
            _ => None,
        }
    }

    /// Current perpetual funding rate per venue for a symbol.
    pub fn funding_rates(&self, symbol: &str) -> HashMap<Venue, f64> {
        let mut rates = HashMap::new();
        for entry in self.entries.iter() {
            let key = entry.key();
            if key.symbol != symbol || key.kind != InstrumentKind::Perpetual {
                continue;
            }
            let rate = entry
                .funding
                .map(|f| f.rate)
                .or_else(|| entry.ticker.and_then(|t| t.funding_rate));
            if let Some(rate) = rate {
                rates.insert(key.venue, rate);
            }
        }
        rates
    }

    /// Distinct (symbol, kind) pairs currently present. The detector
    /// snapshots this at the top of each cycle.
    pub fn watched_pairs(&self) -> Vec<(Symbol, InstrumentKind)> {
        let mut pairs = Vec::new();
        for entry in self.entries.iter() {
            let key = entry.key();
            let pair = (key.symbol.clone(), key.kind);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        pairs.sort();
        pairs
    }

    /// All tickers for one (symbol, kind), venue-tagged.
    pub fn tickers_for(&self, symbol: &str, kind: InstrumentKind) -> Vec<(Venue, Ticker)> {
        let mut out = Vec::new();
        for entry in self.entries.iter() {
            let key = entry.key();
            if key.symbol == symbol && key.kind == kind {
                if let Some(ticker) = entry.ticker {
                    out.push((key.venue, ticker));
                }
            }
        }
        out.sort_by_key(|(venue, _)| venue.priority());
        out
    }

    /// All tickers of some kind on one venue, symbol-tagged. Used by the
    /// calendar scan to enumerate dated futures per venue.
    pub fn venue_tickers_of_kind(&self, venue: Venue, kind: InstrumentKind) -> Vec<(Symbol, Ticker)> {
        let mut out = Vec::new();
        for entry in self.entries.iter() {
            let key = entry.key();
            if key.venue == venue && key.kind == kind {
                if let Some(ticker) = entry.ticker {
                    out.push((key.symbol.clone(), ticker));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// True when the key was updated within the freshness window.
    pub fn is_fresh(&self, key: &BookKey, now_us: u64, stale_after_us: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) => {
                let last = entry.last_update_us();
                last > 0 && now_us.saturating_sub(last) <= stale_after_us
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    pub fn remove_key(&self, key: &BookKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every key belonging to a venue, e.g. after it is marked
    /// failed. Returns the number of keys removed.
    pub fn remove_venue(&self, venue: Venue) -> usize {
        let keys: Vec<BookKey> = self
            .entries
            .iter()
            .filter(|e| e.key().venue == venue)
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MarketIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Choose between two (price, size, venue) candidates for one side.
fn pick_better(
    candidate: (f64, f64, Venue),
    current: (f64, f64, Venue),
    is_bid: bool,
) -> (f64, f64, Venue) {
    let (cand_px, cand_sz, cand_venue) = candidate;
    let (cur_px, cur_sz, cur_venue) = current;

    let price_improves = if is_bid {
        cand_px > cur_px + EPSILON
    } else {
        cand_px < cur_px - EPSILON
    };
    if price_improves {
        return candidate;
    }
    if approx_eq(cand_px, cur_px) {
        if cand_sz > cur_sz + EPSILON {
            return candidate;
        }
        if approx_eq(cand_sz, cur_sz) && cand_venue.priority() < cur_venue.priority() {
            return candidate;
        }
    }
    current
}
