//! Engine health counters.
//!
//! The engine keeps operating through recoverable errors; these counters
//! are how reduced coverage stays observable without a metrics exporter.
//! Counter cells are padded to a cache line so unrelated hot paths do not
//! false-share.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// One padded counter cell.
#[derive(Default)]
#[repr(align(64))]
struct Cell(AtomicU64);

impl Cell {
    #[inline(always)]
    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct EngineCounters {
    events_ingested: Cell,
    desyncs: Cell,
    resync_requests: Cell,
    stale_skips: Cell,
    candidate_errors: Cell,
    opportunities_detected: Cell,
    opportunities_rejected: Cell,
    opportunities_expired: Cell,
    opportunities_dropped: Cell,
    cycles_run: Cell,
    cycles_skipped: Cell,
    reconnects: Cell,
}

impl EngineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_events_ingested(&self) {
        self.events_ingested.incr();
    }
    pub fn incr_desyncs(&self) {
        self.desyncs.incr();
    }
    pub fn incr_resync_requests(&self) {
        self.resync_requests.incr();
    }
    pub fn incr_stale_skips(&self) {
        self.stale_skips.incr();
    }
    pub fn incr_candidate_errors(&self) {
        self.candidate_errors.incr();
    }
    pub fn incr_opportunities_detected(&self) {
        self.opportunities_detected.incr();
    }
    pub fn incr_opportunities_rejected(&self) {
        self.opportunities_rejected.incr();
    }
    pub fn add_opportunities_expired(&self, n: u64) {
        self.opportunities_expired.add(n);
    }
    pub fn incr_opportunities_dropped(&self) {
        self.opportunities_dropped.incr();
    }
    pub fn incr_cycles_run(&self) {
        self.cycles_run.incr();
    }
    pub fn incr_cycles_skipped(&self) {
        self.cycles_skipped.incr();
    }
    pub fn incr_reconnects(&self) {
        self.reconnects.incr();
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            events_ingested: self.events_ingested.get(),
            desyncs: self.desyncs.get(),
            resync_requests: self.resync_requests.get(),
            stale_skips: self.stale_skips.get(),
            candidate_errors: self.candidate_errors.get(),
            opportunities_detected: self.opportunities_detected.get(),
            opportunities_rejected: self.opportunities_rejected.get(),
            opportunities_expired: self.opportunities_expired.get(),
            opportunities_dropped: self.opportunities_dropped.get(),
            cycles_run: self.cycles_run.get(),
            cycles_skipped: self.cycles_skipped.get(),
            reconnects: self.reconnects.get(),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub events_ingested: u64,
    pub desyncs: u64,
    pub resync_requests: u64,
    pub stale_skips: u64,
    pub candidate_errors: u64,
    pub opportunities_detected: u64,
    pub opportunities_rejected: u64,
    pub opportunities_expired: u64,
    pub opportunities_dropped: u64,
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub reconnects: u64,
}
