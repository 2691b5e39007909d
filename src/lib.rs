//! Cross-venue crypto arbitrage detection engine.
//!
//! Venue adapters deliver normalized market events into a concurrent
//! market index; a periodic detector scans the index for spot
//! cross-venue, synthetic, funding-spread and calendar-spread
//! opportunities, gates them against risk policy and publishes survivors
//! to bounded consumer queues. Detection only: order placement, storage
//! and transport live outside this crate.

use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync>;

pub mod adapter;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fees;
pub mod market;
pub mod sim_adapter;
pub mod types;

pub use adapter::VenueAdapter;
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::PolicyConfig;
pub use engine::bus::{BusConsumer, OpportunityBus, OverflowPolicy};
pub use engine::counters::{CountersSnapshot, EngineCounters};
pub use engine::detector::Detector;
pub use engine::dispatcher::{Dispatcher, Shutdown};
pub use engine::risk::{RejectReason, RiskGate};
pub use engine::synthetic::SyntheticPricer;
pub use error::{AdapterError, ConfigError, DesyncError, DesyncReason, EngineError};
pub use fees::FeeSchedule;
pub use market::{BestAcrossVenues, BookView, MarketIndex, OrderBook, TopOfBook};
pub use sim_adapter::{SimAdapter, SimFeed};
pub use types::{
    BookKey, ConnectionState, FundingRecord, InstrumentKind, Leg, MarketEvent, Opportunity,
    OpportunityKind, PositionEntry, PositionSnapshot, PriceLevel, Side, Symbol, Ticker, Trade,
    Venue,
};
