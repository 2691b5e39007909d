//! Per-venue fee schedule.
//!
//! Fee lookups sit on the detection hot path, so the schedule is a plain
//! array indexed by the venue's dense index rather than a map keyed by
//! name. Policy taker/maker defaults seed every slot; hosts with
//! negotiated venue tiers apply overrides on top.

use crate::config::PolicyConfig;
use crate::types::Venue;
use once_cell::sync::Lazy;
use std::collections::HashMap;

const VENUE_COUNT: usize = Venue::ALL.len();

/// Name lookup for config files and logs. The hot path never touches this.
static NAME_TO_VENUE: Lazy<HashMap<&'static str, Venue>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(VENUE_COUNT);
    for venue in Venue::ALL {
        map.insert(venue.as_str(), venue);
    }
    map
});

pub fn venue_by_name(name: &str) -> Option<Venue> {
    NAME_TO_VENUE.get(name.to_lowercase().as_str()).copied()
}

/// Resolved taker/maker fees per venue, in basis points.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    taker_bps: [f64; VENUE_COUNT],
    maker_bps: [f64; VENUE_COUNT],
}

impl FeeSchedule {
    /// Seed every venue from the policy defaults.
    pub fn from_policy(config: &PolicyConfig) -> Self {
        Self::flat(config.taker_fee_bps, config.maker_fee_bps)
    }

    pub fn flat(taker_bps: f64, maker_bps: f64) -> Self {
        Self {
            taker_bps: [taker_bps; VENUE_COUNT],
            maker_bps: [maker_bps; VENUE_COUNT],
        }
    }

    /// Override one venue's taker fee, e.g. for a negotiated tier.
    pub fn with_taker_override(mut self, venue: Venue, taker_bps: f64) -> Self {
        self.taker_bps[venue.index()] = taker_bps;
        self
    }

    #[inline(always)]
    pub fn taker_bps(&self, venue: Venue) -> f64 {
        self.taker_bps[venue.index()]
    }

    #[inline(always)]
    pub fn maker_bps(&self, venue: Venue) -> f64 {
        self.maker_bps[venue.index()]
    }

    /// Total taker cost in bps across two venues, the usual two-leg case.
    #[inline(always)]
    pub fn round_trip_taker_bps(&self, a: Venue, b: Venue) -> f64 {
        self.taker_bps(a) + self.taker_bps(b)
    }

    /// USD taker cost of executing `notional` on `venue`.
    #[inline(always)]
    pub fn taker_cost(&self, venue: Venue, notional: f64) -> f64 {
        notional * self.taker_bps(venue) / 10_000.0
    }
}
