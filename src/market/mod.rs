//! Market-data plane: per-key order books, lock-free top-of-book cells and
//! the concurrent cross-venue index.

pub mod book;
pub mod index;
pub mod top_of_book;

pub use book::{BookView, OrderBook, SnapshotOutcome, VwapFill};
pub use index::{BestAcrossVenues, MarketIndex};
pub use top_of_book::{TopOfBook, TopOfBookQuote};
