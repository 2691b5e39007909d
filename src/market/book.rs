//! Per-market L2 order book.
//!
//! One side-sorted ladder per side, built from a snapshot and maintained by
//! deltas. A book is mutated only by the ingest worker of its venue; the
//! detector reads through copied-out views, so no reader ever observes a
//! half-applied delta.
//!
//! Sequence discipline: when both the book and a delta carry venue
//! sequences, the delta must be exactly `last_seq + 1`. Anything else, a
//! delta against an uninitialized book, or a delta that crosses the book,
//! clears the ladder and surfaces a desync so the owning adapter can
//! re-request a snapshot.

use crate::error::{DesyncError, DesyncReason};
use crate::types::{BookKey, PriceLevel, Side, EPSILON};
use std::collections::BTreeMap;

/// Ladder key. Bids compare descending so that `first_key_value` is always
/// the best level on either side.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedPrice {
    price: f64,
    is_bid: bool,
}

impl Eq for OrderedPrice {}

impl PartialOrd for OrderedPrice {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedPrice {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.is_bid {
            other
                .price
                .partial_cmp(&self.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        } else {
            self.price
                .partial_cmp(&other.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BookLevel {
    quantity: f64,
    order_count: u32,
}

/// Outcome of a snapshot application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// Snapshot timestamp predates the book's last update; discarded.
    StaleDiscarded,
}

/// Result of a VWAP sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VwapFill {
    pub avg_price: f64,
    pub filled_quantity: f64,
    /// False when the ladder ran out before the target was filled.
    pub complete: bool,
}

/// Copied-out immutable view of a book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookView {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_update_us: u64,
    pub last_seq: Option<u64>,
    pub initialized: bool,
}

impl BookView {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }
}

/// Aggregate ladder statistics over the top `max_levels`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthStats {
    pub total_bid_volume: f64,
    pub total_ask_volume: f64,
    pub avg_bid_price: f64,
    pub avg_ask_price: f64,
    pub bid_levels: usize,
    pub ask_levels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    key: BookKey,
    bids: BTreeMap<OrderedPrice, BookLevel>,
    asks: BTreeMap<OrderedPrice, BookLevel>,
    last_update_us: u64,
    last_seq: Option<u64>,
    initialized: bool,
}

impl OrderBook {
    /// Create an empty, uninitialized book. Nothing is readable until a
    /// snapshot arrives.
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_us: 0,
            last_seq: None,
            initialized: false,
        }
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    #[inline(always)]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    #[inline(always)]
    pub fn last_update_us(&self) -> u64 {
        self.last_update_us
    }

    #[inline(always)]
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Replace both sides from a venue snapshot.
    ///
    /// Out-of-order snapshots (timestamp older than the last applied
    /// update) are discarded rather than applied backwards.
    pub fn apply_snapshot(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: Option<u64>,
        timestamp_us: u64,
    ) -> SnapshotOutcome {
        if self.initialized && timestamp_us < self.last_update_us {
            return SnapshotOutcome::StaleDiscarded;
        }

        self.bids.clear();
        self.asks.clear();
        for level in bids {
            if level.quantity > EPSILON {
                self.bids.insert(
                    OrderedPrice {
                        price: level.price,
                        is_bid: true,
                    },
                    BookLevel {
                        quantity: level.quantity,
                        order_count: level.order_count,
                    },
                );
            }
        }
        for level in asks {
            if level.quantity > EPSILON {
                self.asks.insert(
                    OrderedPrice {
                        price: level.price,
                        is_bid: false,
                    },
                    BookLevel {
                        quantity: level.quantity,
                        order_count: level.order_count,
                    },
                );
            }
        }

        self.last_seq = seq;
        self.last_update_us = timestamp_us;
        self.initialized = true;
        self.debug_check_invariants();
        SnapshotOutcome::Applied
    }

    /// Apply an incremental delta. A level with `quantity == 0` removes
    /// that price.
    pub fn apply_delta(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        seq: Option<u64>,
        timestamp_us: u64,
    ) -> Result<(), DesyncError> {
        if !self.initialized {
            return Err(self.desync(DesyncReason::NotInitialized, None, seq));
        }

        if let (Some(last), Some(got)) = (self.last_seq, seq) {
            if got != last + 1 {
                return Err(self.desync(DesyncReason::SequenceGap, Some(last + 1), Some(got)));
            }
        }

        Self::apply_side(&mut self.bids, bids, true);
        Self::apply_side(&mut self.asks, asks, false);

        if let (Some(bid), Some(ask)) = (self.best_bid_price(), self.best_ask_price()) {
            if bid >= ask - EPSILON {
                return Err(self.desync(DesyncReason::CrossedBook, None, seq));
            }
        }

        if let Some(got) = seq {
            self.last_seq = Some(got);
        }
        let prev_update = self.last_update_us;
        self.last_update_us = self.last_update_us.max(timestamp_us);
        debug_assert!(
            self.last_update_us >= prev_update,
            "last_update went backwards on {}",
            self.key
        );
        debug_assert!(
            match (self.best_bid_price(), self.best_ask_price()) {
                (Some(bid), Some(ask)) => bid < ask,
                _ => true,
            },
            "crossed book survived delta application on {}",
            self.key
        );
        self.debug_check_invariants();
        Ok(())
    }

    /// Internal invariants, checked in debug builds only. A violation
    /// here is a bug in the application logic, not bad venue data, and
    /// panics the owning task.
    fn debug_check_invariants(&self) {
        debug_assert!(
            self.bids.values().all(|l| l.quantity > EPSILON),
            "stored bid level with non-positive quantity on {}",
            self.key
        );
        debug_assert!(
            self.asks.values().all(|l| l.quantity > EPSILON),
            "stored ask level with non-positive quantity on {}",
            self.key
        );
    }

    fn apply_side(side: &mut BTreeMap<OrderedPrice, BookLevel>, levels: &[PriceLevel], is_bid: bool) {
        for level in levels {
            let key = OrderedPrice {
                price: level.price,
                is_bid,
            };
            if level.quantity <= EPSILON {
                side.remove(&key);
            } else {
                side.insert(
                    key,
                    BookLevel {
                        quantity: level.quantity,
                        order_count: level.order_count,
                    },
                );
            }
        }
    }

    fn desync(
        &mut self,
        reason: DesyncReason,
        expected: Option<u64>,
        got: Option<u64>,
    ) -> DesyncError {
        self.bids.clear();
        self.asks.clear();
        self.initialized = false;
        self.last_seq = None;
        DesyncError {
            key: self.key.clone(),
            reason,
            expected,
            got,
        }
    }

    /// Drop all state, e.g. on unsubscribe.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.initialized = false;
        self.last_seq = None;
    }

    #[inline]
    pub fn best_bid_price(&self) -> Option<f64> {
        self.bids.first_key_value().map(|(k, _)| k.price)
    }

    #[inline]
    pub fn best_ask_price(&self) -> Option<f64> {
        self.asks.first_key_value().map(|(k, _)| k.price)
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .first_key_value()
            .map(|(k, v)| PriceLevel::with_count(k.price, v.quantity, v.order_count))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .first_key_value()
            .map(|(k, v)| PriceLevel::with_count(k.price, v.quantity, v.order_count))
    }

    /// Top `n` levels per side in natural order, copied out.
    pub fn top(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (self.top_bids(n), self.top_asks(n))
    }

    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .take(n)
            .map(|(k, v)| PriceLevel::with_count(k.price, v.quantity, v.order_count))
            .collect()
    }

    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(k, v)| PriceLevel::with_count(k.price, v.quantity, v.order_count))
            .collect()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid_price(), self.best_ask_price()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Size-weighted mid: the bid price weighted by ask size and vice
    /// versa, so the price leans toward the thicker side.
    pub fn microprice(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let total = bid.quantity + ask.quantity;
        if total < EPSILON {
            return self.mid();
        }
        Some((bid.price * ask.quantity + ask.price * bid.quantity) / total)
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid_price(), self.best_ask_price()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        match (self.spread(), self.mid()) {
            (Some(spread), Some(mid)) if mid > EPSILON => Some(spread / mid * 10_000.0),
            _ => None,
        }
    }

    /// (bid_qty - ask_qty) / (bid_qty + ask_qty) over the top `depth`
    /// levels. Range -1 (all asks) to +1 (all bids).
    pub fn imbalance(&self, depth: usize) -> f64 {
        let bid_qty: f64 = self.bids.values().take(depth).map(|l| l.quantity).sum();
        let ask_qty: f64 = self.asks.values().take(depth).map(|l| l.quantity).sum();
        let total = bid_qty + ask_qty;
        if total < EPSILON {
            0.0
        } else {
            (bid_qty - ask_qty) / total
        }
    }

    /// Summed quantity over the top `depth` levels, per side.
    pub fn depth_at(&self, depth: usize) -> (f64, f64) {
        let bid_qty: f64 = self.bids.values().take(depth).map(|l| l.quantity).sum();
        let ask_qty: f64 = self.asks.values().take(depth).map(|l| l.quantity).sum();
        (bid_qty, ask_qty)
    }

    /// Aggregate statistics over the top `max_levels` of each ladder.
    pub fn depth_stats(&self, max_levels: usize) -> DepthStats {
        let mut stats = DepthStats::default();

        for (key, level) in self.bids.iter().take(max_levels) {
            stats.total_bid_volume += level.quantity;
            stats.avg_bid_price += key.price * level.quantity;
            stats.bid_levels += 1;
        }
        if stats.total_bid_volume > EPSILON {
            stats.avg_bid_price /= stats.total_bid_volume;
        }

        for (key, level) in self.asks.iter().take(max_levels) {
            stats.total_ask_volume += level.quantity;
            stats.avg_ask_price += key.price * level.quantity;
            stats.ask_levels += 1;
        }
        if stats.total_ask_volume > EPSILON {
            stats.avg_ask_price /= stats.total_ask_volume;
        }

        stats
    }

    /// Sweep the ladder best-first until `target_quantity` is filled.
    ///
    /// Buys cross the asks, sells cross the bids. When liquidity runs out
    /// the fill is partial and `complete` is false.
    pub fn vwap(&self, side: Side, target_quantity: f64) -> Option<VwapFill> {
        if target_quantity <= EPSILON {
            return None;
        }
        let ladder = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        if ladder.is_empty() {
            return None;
        }

        let mut remaining = target_quantity;
        let mut total_cost = 0.0;
        let mut total_filled = 0.0;

        for (key, level) in ladder.iter() {
            if remaining <= EPSILON {
                break;
            }
            let fill = remaining.min(level.quantity);
            total_cost += fill * key.price;
            total_filled += fill;
            remaining -= fill;
        }

        Some(VwapFill {
            avg_price: total_cost / total_filled,
            filled_quantity: total_filled,
            complete: remaining <= EPSILON,
        })
    }

    /// Initialized with both sides present and not crossed.
    pub fn valid(&self) -> bool {
        if !self.initialized {
            return false;
        }
        match (self.best_bid_price(), self.best_ask_price()) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => false,
        }
    }

    /// Full copied-out view.
    pub fn snapshot(&self) -> BookView {
        BookView {
            bids: self.top_bids(usize::MAX),
            asks: self.top_asks(usize::MAX),
            last_update_us: self.last_update_us,
            last_seq: self.last_seq,
            initialized: self.initialized,
        }
    }

    #[inline]
    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    #[inline]
    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
