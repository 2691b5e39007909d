//! Detection engine: synthetic pricing, the periodic opportunity scanner,
//! the risk gate, the outbound bus and the dispatcher that owns the
//! adapters.

pub mod bus;
pub mod counters;
pub mod detector;
pub mod dispatcher;
pub mod risk;
pub mod synthetic;

pub use bus::{BusConsumer, OpportunityBus, OverflowPolicy};
pub use counters::{CountersSnapshot, EngineCounters};
pub use detector::Detector;
pub use dispatcher::Dispatcher;
pub use risk::{RejectReason, RiskGate};
pub use synthetic::SyntheticPricer;
