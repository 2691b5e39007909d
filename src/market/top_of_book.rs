//! Lock-free top-of-book cell.
//!
//! A writer publishes best bid/ask under an even/odd sequence protocol:
//! the sequence is bumped to odd before the field stores and back to even
//! after, with release ordering on the trailing bump. A reader snapshots
//! the sequence, copies the fields, and retries if the sequence was odd or
//! changed underneath it. Writers never block, readers never block writers,
//! and a reader can at worst observe slightly stale but never torn data.
//!
//! Cross-venue aggregation reads these cells instead of locking book
//! entries, which keeps `best_across_venues` off every writer's path.

use std::sync::atomic::{AtomicU64, Ordering};

/// One published quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopOfBookQuote {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub timestamp_us: u64,
}

impl TopOfBookQuote {
    /// Both sides present and positive.
    #[inline(always)]
    pub fn is_quoted(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0
    }
}

#[derive(Debug)]
pub struct TopOfBook {
    seq: AtomicU64,
    bid_bits: AtomicU64,
    ask_bits: AtomicU64,
    bid_size_bits: AtomicU64,
    ask_size_bits: AtomicU64,
    timestamp_us: AtomicU64,
}

impl TopOfBook {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            bid_bits: AtomicU64::new(0),
            ask_bits: AtomicU64::new(0),
            bid_size_bits: AtomicU64::new(0),
            ask_size_bits: AtomicU64::new(0),
            timestamp_us: AtomicU64::new(0),
        }
    }

    /// Publish a new quote. Single writer per cell: the ingest worker that
    /// owns the venue partition.
    pub fn publish(&self, quote: TopOfBookQuote) {
        let prev = self.seq.fetch_add(1, Ordering::AcqRel); // now odd: write in progress
        debug_assert!(
            prev % 2 == 0,
            "concurrent publish on a single-writer top-of-book cell"
        );
        self.bid_bits.store(quote.bid.to_bits(), Ordering::Relaxed);
        self.ask_bits.store(quote.ask.to_bits(), Ordering::Relaxed);
        self.bid_size_bits
            .store(quote.bid_size.to_bits(), Ordering::Relaxed);
        self.ask_size_bits
            .store(quote.ask_size.to_bits(), Ordering::Relaxed);
        self.timestamp_us
            .store(quote.timestamp_us, Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release); // even again: visible
    }

    /// Read the latest quote, retrying on torn reads. Returns `None` if
    /// nothing has been published yet.
    pub fn read(&self) -> Option<TopOfBookQuote> {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let quote = TopOfBookQuote {
                bid: f64::from_bits(self.bid_bits.load(Ordering::Relaxed)),
                ask: f64::from_bits(self.ask_bits.load(Ordering::Relaxed)),
                bid_size: f64::from_bits(self.bid_size_bits.load(Ordering::Relaxed)),
                ask_size: f64::from_bits(self.ask_size_bits.load(Ordering::Relaxed)),
                timestamp_us: self.timestamp_us.load(Ordering::Relaxed),
            };

            let after = self.seq.load(Ordering::Acquire);
            if before == after {
                return Some(quote);
            }
            std::hint::spin_loop();
        }
    }
}

impl Default for TopOfBook {
    fn default() -> Self {
        Self::new()
    }
}
