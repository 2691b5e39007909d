//! Periodic opportunity scanner.
//!
//! Every `detection_interval_ms` the detector snapshots the watched pairs
//! out of the market index and scans four opportunity classes in order:
//! spot cross-venue, synthetic mispricing, funding spread, calendar
//! spread. Inside a class candidates rank by profit (bps) descending,
//! then by required capital ascending. Survivors pass through the risk
//! gate; accepted opportunities land on the bus and in the bounded live
//! list until their TTL lapses.
//!
//! The detector never blocks on market data: a missing ticker, a stale
//! key or a degenerate quantity just skips that candidate for the cycle.
//! A cycle that overruns the interval skips the next tick instead of
//! queueing work behind itself.

use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::engine::bus::OpportunityBus;
use crate::engine::counters::EngineCounters;
use crate::engine::dispatcher::Shutdown;
use crate::engine::risk::RiskGate;
use crate::engine::synthetic::SyntheticPricer;
use crate::fees::FeeSchedule;
use crate::market::index::MarketIndex;
use crate::types::{
    next_opportunity_id, BookKey, InstrumentKind, Leg, Opportunity, OpportunityKind,
    PositionSnapshot, Side, Symbol, Ticker, Venue, EPSILON,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Detector {
    index: Arc<MarketIndex>,
    pricer: SyntheticPricer,
    gate: RiskGate,
    bus: Arc<OpportunityBus>,
    fees: FeeSchedule,
    config: Arc<PolicyConfig>,
    clock: Arc<dyn Clock>,
    counters: Arc<EngineCounters>,
    positions: Arc<RwLock<PositionSnapshot>>,
    live: Vec<Opportunity>,
}

impl Detector {
    pub fn new(
        index: Arc<MarketIndex>,
        bus: Arc<OpportunityBus>,
        positions: Arc<RwLock<PositionSnapshot>>,
        clock: Arc<dyn Clock>,
        config: Arc<PolicyConfig>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        let pricer = SyntheticPricer::new(Arc::clone(&index), Arc::clone(&clock), &config);
        let gate = RiskGate::new(Arc::clone(&config));
        let fees = FeeSchedule::from_policy(&config);
        Self {
            index,
            pricer,
            gate,
            bus,
            fees,
            config,
            clock,
            counters,
            positions,
            live: Vec::new(),
        }
    }

    /// Replace the default flat fee schedule, e.g. with venue overrides.
    pub fn set_fee_schedule(&mut self, fees: FeeSchedule) {
        self.fees = fees;
    }

    /// Run until shutdown. One scan per interval; an over-budget cycle
    /// skips the following tick rather than piling up.
    pub async fn run(&mut self, shutdown: Arc<Shutdown>) {
        let interval = Duration::from_millis(self.config.detection_interval_ms);
        info!(interval_ms = self.config.detection_interval_ms, "detector started");

        let mut skip_next = false;
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if shutdown.is_triggered() {
                break;
            }
            if skip_next {
                skip_next = false;
                self.counters.incr_cycles_skipped();
                warn!("detection cycle over budget, skipping one tick");
                continue;
            }

            let started_us = self.clock.mono_us();
            self.run_cycle();
            let elapsed_ms = self.clock.mono_us().saturating_sub(started_us) / 1_000;
            if elapsed_ms > self.config.detection_interval_ms {
                skip_next = true;
            }
        }
        info!("detector stopped");
    }

    /// One full scan cycle. Public so hosts and tests can drive cycles
    /// synchronously against a virtual clock.
    pub fn run_cycle(&mut self) {
        self.counters.incr_cycles_run();
        let pairs = self.index.watched_pairs();

        let mut spot = Vec::new();
        let mut synthetic = Vec::new();
        let mut funding = Vec::new();

        for (symbol, kind) in &pairs {
            match kind {
                InstrumentKind::Spot => {
                    if let Some(opp) = self.scan_spot_cross_venue(symbol) {
                        spot.push(opp);
                    }
                }
                InstrumentKind::Perpetual => {
                    synthetic.extend(self.scan_synthetic(symbol));
                    if let Some(opp) = self.scan_funding_spread(symbol) {
                        funding.push(opp);
                    }
                }
                _ => {}
            }
        }
        let calendar = self.scan_calendar_spreads();

        // Emission order: spot, synthetic, funding, calendar; ranked
        // within each class.
        let mut candidates = Vec::new();
        for mut class in [spot, synthetic, funding, calendar] {
            rank_candidates(&mut class);
            candidates.append(&mut class);
        }

        let positions = self.positions.read().clone();
        for opportunity in candidates {
            match self.gate.check(&opportunity, &positions) {
                Ok(()) => {
                    self.counters.incr_opportunities_detected();
                    debug!(
                        id = %opportunity.id,
                        kind = ?opportunity.kind,
                        profit_bps = opportunity.profit_bps,
                        "opportunity accepted"
                    );
                    self.bus.publish(&opportunity);
                    self.push_live(opportunity);
                }
                Err(reason) => {
                    self.counters.incr_opportunities_rejected();
                    debug!(
                        id = %opportunity.id,
                        reason = reason.label(),
                        "opportunity rejected"
                    );
                }
            }
        }

        self.cleanup_expired();
    }

    /// Opportunities still inside their TTL.
    pub fn live_opportunities(&self) -> &[Opportunity] {
        &self.live
    }

    fn push_live(&mut self, opportunity: Opportunity) {
        if self.live.len() >= self.config.max_opportunity_queue {
            self.live.remove(0);
            self.counters.incr_opportunities_dropped();
        }
        self.live.push(opportunity);
    }

    /// Drop live opportunities whose TTL lapsed.
    pub fn cleanup_expired(&mut self) {
        let now_ms = self.clock.wall_ms();
        let before = self.live.len();
        self.live.retain(|opp| !opp.is_expired(now_ms));
        let expired = (before - self.live.len()) as u64;
        if expired > 0 {
            self.counters.add_opportunities_expired(expired);
        }
    }

    // ------------------------------------------------------------------
    // Class scans
    // ------------------------------------------------------------------

    fn scan_spot_cross_venue(&self, symbol: &str) -> Option<Opportunity> {
        let best = self.index.best_across_venues(symbol, InstrumentKind::Spot)?;
        if best.best_bid_venue == best.best_ask_venue {
            return None;
        }

        let buy_key = BookKey::spot(best.best_ask_venue, symbol);
        let sell_key = BookKey::spot(best.best_bid_venue, symbol);
        if !self.is_fresh(&buy_key) || !self.is_fresh(&sell_key) {
            self.counters.incr_stale_skips();
            return None;
        }

        let gross_bps = (best.best_bid - best.best_ask) / best.best_ask * 10_000.0;
        if gross_bps <= 0.0 {
            return None;
        }
        let fee_bps = self
            .fees
            .round_trip_taker_bps(best.best_ask_venue, best.best_bid_venue);
        let net_bps = gross_bps - fee_bps;
        if net_bps < self.config.min_profit_bps {
            return None;
        }

        let quantity = best.best_ask_size.min(best.best_bid_size);
        if quantity <= EPSILON {
            self.counters.incr_candidate_errors();
            return None;
        }

        let legs = vec![
            Leg {
                venue: best.best_ask_venue,
                symbol: symbol.to_string(),
                kind: InstrumentKind::Spot,
                side: Side::Buy,
                price: best.best_ask,
                quantity,
                synthetic: false,
            },
            Leg {
                venue: best.best_bid_venue,
                symbol: symbol.to_string(),
                kind: InstrumentKind::Spot,
                side: Side::Sell,
                price: best.best_bid,
                quantity,
                synthetic: false,
            },
        ];

        let gross_profit = (best.best_bid - best.best_ask) * quantity;
        let fee_cost = self
            .fees
            .taker_cost(best.best_ask_venue, best.best_ask * quantity)
            + self
                .fees
                .taker_cost(best.best_bid_venue, best.best_bid * quantity);
        let expected_profit = gross_profit - fee_cost;
        if expected_profit <= 0.0 {
            return None;
        }

        Some(self.build_opportunity(
            OpportunityKind::SpotCrossVenue,
            legs,
            expected_profit,
            net_bps,
            best.best_ask * quantity,
            0.0,
            self.config.opportunity_ttl_ms,
        ))
    }

    fn scan_synthetic(&self, symbol: &str) -> Vec<Opportunity> {
        let holding_hours = 24.0 / self.config.funding_intervals_per_day as f64;
        let mut found = Vec::new();

        for spot_venue in Venue::ALL {
            let spot_key = BookKey::spot(spot_venue, symbol);
            let Some(spot_ticker) = self.index.get_ticker(&spot_key) else {
                continue;
            };
            if !spot_ticker.is_quoted() {
                continue;
            }
            if !self.is_fresh(&spot_key) {
                self.counters.incr_stale_skips();
                continue;
            }

            for perp_venue in Venue::ALL {
                let perp_key = BookKey::perpetual(perp_venue, symbol);
                let Some(perp_ticker) = self.index.get_ticker(&perp_key) else {
                    continue;
                };
                if !perp_ticker.is_quoted() {
                    continue;
                }
                if !self.is_fresh(&perp_key) {
                    self.counters.incr_stale_skips();
                    continue;
                }

                let Some(mispricing_bps) = self.pricer.perp_mispricing_bps(
                    symbol,
                    spot_venue,
                    perp_venue,
                    holding_hours,
                ) else {
                    continue;
                };

                let fee_bps = self.fees.round_trip_taker_bps(spot_venue, perp_venue);
                let net_bps = mispricing_bps.abs() - fee_bps;
                if net_bps < self.config.min_profit_bps {
                    continue;
                }

                // Positive mispricing: the perp-derived synthetic is rich,
                // so buy real spot and sell the perpetual.
                let (buy, sell) = if mispricing_bps > 0.0 {
                    (
                        (spot_venue, InstrumentKind::Spot, spot_ticker, false),
                        (perp_venue, InstrumentKind::Perpetual, perp_ticker, true),
                    )
                } else {
                    (
                        (perp_venue, InstrumentKind::Perpetual, perp_ticker, true),
                        (spot_venue, InstrumentKind::Spot, spot_ticker, false),
                    )
                };

                let quantity = buy.2.ask_size.min(sell.2.bid_size);
                if quantity <= EPSILON {
                    self.counters.incr_candidate_errors();
                    continue;
                }

                let legs = vec![
                    Leg {
                        venue: buy.0,
                        symbol: symbol.to_string(),
                        kind: buy.1,
                        side: Side::Buy,
                        price: buy.2.ask,
                        quantity,
                        synthetic: buy.3,
                    },
                    Leg {
                        venue: sell.0,
                        symbol: symbol.to_string(),
                        kind: sell.1,
                        side: Side::Sell,
                        price: sell.2.bid,
                        quantity,
                        synthetic: sell.3,
                    },
                ];

                let spot_mid = spot_ticker.mid();
                let expected_profit = net_bps / 10_000.0 * spot_mid * quantity;
                let funding_risk = perp_ticker
                    .funding_rate
                    .or_else(|| self.index.get_funding(&perp_key).map(|f| f.rate))
                    .map(f64::abs)
                    .unwrap_or(0.0);

                found.push(self.build_opportunity(
                    OpportunityKind::SyntheticMispricing,
                    legs,
                    expected_profit,
                    net_bps,
                    spot_mid * quantity,
                    funding_risk,
                    self.config.opportunity_ttl_ms,
                ));
            }
        }
        found
    }

    fn scan_funding_spread(&self, symbol: &str) -> Option<Opportunity> {
        let rates = self.index.funding_rates(symbol);
        if rates.len() < 2 {
            return None;
        }

        let (&min_venue, &min_rate) = rates
            .iter()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let (&max_venue, &max_rate) = rates
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        if min_venue == max_venue {
            return None;
        }

        let spread = max_rate - min_rate;
        let spread_bps = spread * 10_000.0;
        if spread_bps <= self.config.min_profit_bps {
            return None;
        }

        let long_key = BookKey::perpetual(min_venue, symbol);
        let short_key = BookKey::perpetual(max_venue, symbol);
        let long_ticker = self.index.get_ticker(&long_key)?;
        let short_ticker = self.index.get_ticker(&short_key)?;
        if !long_ticker.is_quoted() || !short_ticker.is_quoted() {
            return None;
        }
        if !self.is_fresh(&long_key) || !self.is_fresh(&short_key) {
            self.counters.incr_stale_skips();
            return None;
        }

        let quantity = long_ticker.ask_size.min(short_ticker.bid_size);
        if quantity <= EPSILON {
            self.counters.incr_candidate_errors();
            return None;
        }

        let legs = vec![
            Leg {
                venue: min_venue,
                symbol: symbol.to_string(),
                kind: InstrumentKind::Perpetual,
                side: Side::Buy,
                price: long_ticker.ask,
                quantity,
                synthetic: false,
            },
            Leg {
                venue: max_venue,
                symbol: symbol.to_string(),
                kind: InstrumentKind::Perpetual,
                side: Side::Sell,
                price: short_ticker.bid,
                quantity,
                synthetic: false,
            },
        ];

        // One funding interval of carry on the long-leg notional; capital
        // backs both legs.
        let notional = long_ticker.mid() * quantity;
        Some(self.build_opportunity(
            OpportunityKind::FundingSpread,
            legs,
            spread * notional,
            spread_bps,
            notional * 2.0,
            spread,
            self.config.funding_interval_ms(),
        ))
    }

    fn scan_calendar_spreads(&self) -> Vec<Opportunity> {
        let mut found = Vec::new();

        for venue in Venue::ALL {
            let futures = self
                .index
                .venue_tickers_of_kind(venue, InstrumentKind::Future);
            if futures.len() < 2 {
                continue;
            }

            // Group dated futures by underlying, ordered by expiry.
            let mut by_underlying: Vec<(Symbol, Vec<(Symbol, Ticker)>)> = Vec::new();
            for (symbol, ticker) in futures {
                if ticker.expiry_us.is_none() || !ticker.is_quoted() {
                    continue;
                }
                if !self.is_fresh(&BookKey::new(venue, symbol.clone(), InstrumentKind::Future)) {
                    self.counters.incr_stale_skips();
                    continue;
                }
                let underlying = underlying_of(&symbol).to_string();
                match by_underlying.iter_mut().find(|(u, _)| *u == underlying) {
                    Some((_, list)) => list.push((symbol, ticker)),
                    None => by_underlying.push((underlying, vec![(symbol, ticker)])),
                }
            }

            for (underlying, mut contracts) in by_underlying {
                if contracts.len() < 2 {
                    continue;
                }
                contracts.sort_by_key(|(_, t)| t.expiry_us.unwrap_or(u64::MAX));

                let Some(spot_mid) = self.index.mid(&BookKey::spot(venue, &underlying)) else {
                    continue;
                };
                if spot_mid < EPSILON {
                    continue;
                }

                for i in 0..contracts.len() - 1 {
                    for j in (i + 1)..contracts.len() {
                        if let Some(opp) = self.check_calendar_pair(
                            venue,
                            &underlying,
                            spot_mid,
                            &contracts[i],
                            &contracts[j],
                        ) {
                            found.push(opp);
                        }
                    }
                }
            }
        }
        found
    }

    fn check_calendar_pair(
        &self,
        venue: Venue,
        underlying: &str,
        spot_mid: f64,
        near: &(Symbol, Ticker),
        far: &(Symbol, Ticker),
    ) -> Option<Opportunity> {
        let (near_symbol, near_ticker) = near;
        let (far_symbol, far_ticker) = far;

        let near_fair =
            self.pricer
                .futures_fair_value(underlying, venue, near_ticker.expiry_us?)?;
        let far_fair = self
            .pricer
            .futures_fair_value(underlying, venue, far_ticker.expiry_us?)?;

        let market_spread = far_ticker.mid() - near_ticker.mid();
        let theoretical_spread = far_fair - near_fair;
        let mispricing_bps = (market_spread - theoretical_spread) / spot_mid * 10_000.0;
        if mispricing_bps.abs() < self.config.min_profit_bps {
            return None;
        }

        // Spread too wide: sell the far leg, buy the near one. Too
        // narrow: the other way around.
        let (buy_contract, sell_contract) = if mispricing_bps > 0.0 {
            ((near_symbol, near_ticker), (far_symbol, far_ticker))
        } else {
            ((far_symbol, far_ticker), (near_symbol, near_ticker))
        };

        let quantity = buy_contract.1.ask_size.min(sell_contract.1.bid_size);
        if quantity <= EPSILON {
            self.counters.incr_candidate_errors();
            return None;
        }

        let legs = vec![
            Leg {
                venue,
                symbol: buy_contract.0.clone(),
                kind: InstrumentKind::Future,
                side: Side::Buy,
                price: buy_contract.1.ask,
                quantity,
                synthetic: false,
            },
            Leg {
                venue,
                symbol: sell_contract.0.clone(),
                kind: InstrumentKind::Future,
                side: Side::Sell,
                price: sell_contract.1.bid,
                quantity,
                synthetic: false,
            },
        ];

        let expected_profit = mispricing_bps.abs() / 10_000.0 * spot_mid * quantity;
        Some(self.build_opportunity(
            OpportunityKind::CalendarSpread,
            legs,
            expected_profit,
            mispricing_bps.abs(),
            buy_contract.1.ask * quantity,
            0.0,
            self.config.opportunity_ttl_ms,
        ))
    }

    // ------------------------------------------------------------------
    // Candidate assembly
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn build_opportunity(
        &self,
        kind: OpportunityKind,
        legs: Vec<Leg>,
        expected_profit: f64,
        profit_bps: f64,
        required_capital: f64,
        funding_risk: f64,
        ttl_ms: u64,
    ) -> Opportunity {
        debug_assert!(legs.len() >= 2, "opportunity must carry at least two legs");
        let execution_risk = execution_risk_of(&legs);
        let liquidity_score = self.liquidity_score_of(&legs);
        let executable =
            expected_profit > 0.0 && required_capital <= self.config.max_position_size_usd;

        Opportunity {
            id: next_opportunity_id(kind, self.clock.wall_us()),
            created_at_ms: self.clock.wall_ms(),
            ttl_ms,
            kind,
            legs,
            expected_profit,
            profit_bps,
            required_capital,
            execution_risk,
            funding_risk,
            liquidity_score,
            executable,
        }
    }

    /// Top-of-book depth on the crossed side relative to the leg
    /// quantity, worst leg wins.
    fn liquidity_score_of(&self, legs: &[Leg]) -> f64 {
        let mut score: f64 = 1.0;
        for leg in legs {
            if leg.quantity <= EPSILON {
                return 0.0;
            }
            let key = BookKey::new(leg.venue, leg.symbol.clone(), leg.kind);

            let available = match self.index.get_book_view(&key) {
                Some(view) if view.initialized => {
                    let ladder = match leg.side {
                        Side::Buy => &view.asks,
                        Side::Sell => &view.bids,
                    };
                    ladder
                        .iter()
                        .take(self.config.top_depth)
                        .map(|l| l.quantity)
                        .sum()
                }
                _ => match self.index.get_top_of_book(&key) {
                    Some(quote) => match leg.side {
                        Side::Buy => quote.ask_size,
                        Side::Sell => quote.bid_size,
                    },
                    None => 0.0,
                },
            };
            score = score.min((available / leg.quantity).clamp(0.0, 1.0));
        }
        score
    }

    fn is_fresh(&self, key: &BookKey) -> bool {
        self.index.is_fresh(
            key,
            self.clock.wall_us(),
            self.config.stale_after_ms * 1_000,
        )
    }
}

/// Cross-venue execution adds 0.3; every synthetic leg adds 0.2; capped
/// at 1.0.
fn execution_risk_of(legs: &[Leg]) -> f64 {
    let mut risk = 0.0;
    if let Some(first) = legs.first() {
        if legs.iter().any(|l| l.venue != first.venue) {
            risk += 0.3;
        }
    }
    risk += 0.2 * legs.iter().filter(|l| l.synthetic).count() as f64;
    risk.min(1.0)
}

/// Profit (bps) descending, then required capital ascending.
fn rank_candidates(candidates: &mut [Opportunity]) {
    candidates.sort_by(|a, b| {
        b.profit_bps
            .partial_cmp(&a.profit_bps)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.required_capital
                    .partial_cmp(&b.required_capital)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

/// Underlying of a dated-future symbol: "BTC-USDT-240927" maps to
/// "BTC-USDT". Symbols without a numeric suffix are their own underlying.
fn underlying_of(symbol: &str) -> &str {
    if let Some((prefix, suffix)) = symbol.rsplit_once('-') {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            return prefix;
        }
    }
    symbol
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn make_ticker(bid: f64, ask: f64, bid_size: f64, ask_size: f64, ts: u64) -> Ticker {
        Ticker {
            bid,
            ask,
            bid_size,
            ask_size,
            last: (bid + ask) / 2.0,
            volume_24h: 0.0,
            funding_rate: None,
            expiry_us: None,
            timestamp_us: ts,
        }
    }

    struct Fixture {
        index: Arc<MarketIndex>,
        bus: Arc<OpportunityBus>,
        clock: Arc<VirtualClock>,
        counters: Arc<EngineCounters>,
        positions: Arc<RwLock<PositionSnapshot>>,
        detector: Detector,
    }

    fn fixture(config: PolicyConfig) -> Fixture {
        let index = Arc::new(MarketIndex::new());
        let bus = Arc::new(OpportunityBus::new(config.max_opportunity_queue));
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let counters = Arc::new(EngineCounters::new());
        let positions = Arc::new(RwLock::new(PositionSnapshot::new()));
        let detector = Detector::new(
            Arc::clone(&index),
            Arc::clone(&bus),
            Arc::clone(&positions),
            clock.clone() as Arc<dyn Clock>,
            Arc::new(config),
            Arc::clone(&counters),
        );
        Fixture {
            index,
            bus,
            clock,
            counters,
            positions,
            detector,
        }
    }

    fn seed_spot_pair(fixture: &Fixture) {
        let ts = fixture.clock.wall_us();
        fixture.index.upsert_ticker(
            &BookKey::spot(Venue::Okx, "BTC-USDT"),
            make_ticker(30_000.0, 30_010.0, 1.0, 1.0, ts),
        );
        fixture.index.upsert_ticker(
            &BookKey::spot(Venue::Binance, "BTC-USDT"),
            make_ticker(30_020.0, 30_030.0, 1.0, 1.0, ts),
        );
    }

    #[test]
    fn test_spot_scan_blocked_by_fees() {
        // gross = (30020 - 30010) / 30010 * 1e4 = 3.33 bps; taker 4 bps
        // per leg eats it.
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 1.0,
            ..Default::default()
        });
        seed_spot_pair(&f);
        let consumer = f.bus.subscribe();

        f.detector.run_cycle();
        assert!(consumer.pop().is_none());
        assert_eq!(f.counters.snapshot().opportunities_detected, 0);
    }

    #[test]
    fn test_spot_scan_emits_with_zero_fees() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 1.0,
            taker_fee_bps: 0.0,
            ..Default::default()
        });
        seed_spot_pair(&f);
        let consumer = f.bus.subscribe();

        f.detector.run_cycle();

        let opp = consumer.pop().expect("opportunity should be emitted");
        assert_eq!(opp.kind, OpportunityKind::SpotCrossVenue);
        assert_eq!(opp.legs.len(), 2);
        assert_eq!(opp.legs[0].side, Side::Buy);
        assert_eq!(opp.legs[0].venue, Venue::Okx);
        assert_eq!(opp.legs[0].price, 30_010.0);
        assert_eq!(opp.legs[1].side, Side::Sell);
        assert_eq!(opp.legs[1].venue, Venue::Binance);
        assert_eq!(opp.legs[1].price, 30_020.0);
        assert!((opp.expected_profit - 10.0).abs() < 1e-6);
        assert!(opp.executable);
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_same_venue_best_prices_not_an_opportunity() {
        let mut f = fixture(PolicyConfig {
            taker_fee_bps: 0.0,
            ..Default::default()
        });
        let ts = f.clock.wall_us();
        f.index.upsert_ticker(
            &BookKey::spot(Venue::Okx, "BTC-USDT"),
            make_ticker(30_020.0, 30_010.0, 1.0, 1.0, ts),
        );
        let consumer = f.bus.subscribe();
        f.detector.run_cycle();
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_stale_market_data_skipped() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 1.0,
            taker_fee_bps: 0.0,
            ..Default::default()
        });
        seed_spot_pair(&f);
        let consumer = f.bus.subscribe();

        // Advance well past the freshness window.
        f.clock.advance_ms(10_000);
        f.detector.run_cycle();

        assert!(consumer.pop().is_none());
        assert!(f.counters.snapshot().stale_skips > 0);
    }

    #[test]
    fn test_funding_spread_scan() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 5.0,
            ..Default::default()
        });
        let ts = f.clock.wall_us();
        let okx = BookKey::perpetual(Venue::Okx, "BTC-USDT");
        let bybit = BookKey::perpetual(Venue::Bybit, "BTC-USDT");
        f.index
            .upsert_ticker(&okx, make_ticker(30_000.0, 30_010.0, 1.0, 1.0, ts));
        f.index
            .upsert_ticker(&bybit, make_ticker(30_000.0, 30_010.0, 1.0, 1.0, ts));
        f.index.upsert_funding(
            &okx,
            crate::types::FundingRecord {
                rate: 0.0005,
                next_funding_us: None,
                timestamp_us: ts,
            },
        );
        f.index.upsert_funding(
            &bybit,
            crate::types::FundingRecord {
                rate: -0.0002,
                next_funding_us: None,
                timestamp_us: ts,
            },
        );
        let consumer = f.bus.subscribe();

        f.detector.run_cycle();

        let opp = consumer.pop().expect("funding spread should be emitted");
        assert_eq!(opp.kind, OpportunityKind::FundingSpread);
        // Long where funding is lowest.
        assert_eq!(opp.legs[0].side, Side::Buy);
        assert_eq!(opp.legs[0].venue, Venue::Bybit);
        assert_eq!(opp.legs[1].side, Side::Sell);
        assert_eq!(opp.legs[1].venue, Venue::Okx);
        assert!((opp.profit_bps - 7.0).abs() < 1e-9);
        assert_eq!(opp.ttl_ms, 8 * 3600 * 1000);
    }

    #[test]
    fn test_funding_spread_below_threshold() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 10.0,
            ..Default::default()
        });
        let ts = f.clock.wall_us();
        let okx = BookKey::perpetual(Venue::Okx, "BTC-USDT");
        let bybit = BookKey::perpetual(Venue::Bybit, "BTC-USDT");
        f.index
            .upsert_ticker(&okx, make_ticker(30_000.0, 30_010.0, 1.0, 1.0, ts));
        f.index
            .upsert_ticker(&bybit, make_ticker(30_000.0, 30_010.0, 1.0, 1.0, ts));
        f.index.upsert_funding(
            &okx,
            crate::types::FundingRecord {
                rate: 0.0005,
                next_funding_us: None,
                timestamp_us: ts,
            },
        );
        f.index.upsert_funding(
            &bybit,
            crate::types::FundingRecord {
                rate: -0.0002,
                next_funding_us: None,
                timestamp_us: ts,
            },
        );
        let consumer = f.bus.subscribe();
        f.detector.run_cycle();
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_ttl_cleanup_removes_expired() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 1.0,
            taker_fee_bps: 0.0,
            opportunity_ttl_ms: 100,
            ..Default::default()
        });
        seed_spot_pair(&f);

        f.detector.run_cycle();
        assert_eq!(f.detector.live_opportunities().len(), 1);

        f.clock.advance_ms(200);
        f.detector.cleanup_expired();
        assert!(f.detector.live_opportunities().is_empty());
        assert_eq!(f.counters.snapshot().opportunities_expired, 1);
    }

    #[test]
    fn test_live_list_bounded_drop_oldest() {
        let mut f = fixture(PolicyConfig {
            min_profit_bps: 1.0,
            taker_fee_bps: 0.0,
            max_opportunity_queue: 2,
            opportunity_ttl_ms: 1_000_000,
            ..Default::default()
        });
        seed_spot_pair(&f);

        f.detector.run_cycle();
        f.detector.run_cycle();
        f.detector.run_cycle();

        assert_eq!(f.detector.live_opportunities().len(), 2);
        assert_eq!(f.counters.snapshot().opportunities_dropped, 1);
    }

    #[test]
    fn test_execution_risk_heuristic() {
        let leg = |venue: Venue, synthetic: bool| Leg {
            venue,
            symbol: "BTC-USDT".to_string(),
            kind: InstrumentKind::Spot,
            side: Side::Buy,
            price: 1.0,
            quantity: 1.0,
            synthetic,
        };

        assert_eq!(
            execution_risk_of(&[leg(Venue::Okx, false), leg(Venue::Okx, false)]),
            0.0
        );
        assert!(
            (execution_risk_of(&[leg(Venue::Okx, false), leg(Venue::Bybit, false)]) - 0.3).abs()
                < EPSILON
        );
        assert!(
            (execution_risk_of(&[leg(Venue::Okx, false), leg(Venue::Bybit, true)]) - 0.5).abs()
                < EPSILON
        );
        let many: Vec<Leg> = (0..6)
            .map(|i| leg(if i % 2 == 0 { Venue::Okx } else { Venue::Bybit }, true))
            .collect();
        assert_eq!(execution_risk_of(&many), 1.0);
    }

    #[test]
    fn test_ranking_profit_then_capital() {
        let make = |bps: f64, capital: f64| Opportunity {
            id: String::new(),
            created_at_ms: 0,
            ttl_ms: 1,
            kind: OpportunityKind::SpotCrossVenue,
            legs: Vec::new(),
            expected_profit: 1.0,
            profit_bps: bps,
            required_capital: capital,
            execution_risk: 0.0,
            funding_risk: 0.0,
            liquidity_score: 1.0,
            executable: true,
        };
        let mut candidates = vec![make(5.0, 100.0), make(9.0, 50.0), make(5.0, 10.0)];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].profit_bps, 9.0);
        assert_eq!(candidates[1].required_capital, 10.0);
        assert_eq!(candidates[2].required_capital, 100.0);
    }

    #[test]
    fn test_underlying_of() {
        assert_eq!(underlying_of("BTC-USDT-240927"), "BTC-USDT");
        assert_eq!(underlying_of("BTC-USDT"), "BTC-USDT");
        assert_eq!(underlying_of("ETH-USDT-241227"), "ETH-USDT");
    }

    #[test]
    fn test_rejected_opportunity_never_reaches_bus() {
        let mut config = PolicyConfig {
            min_profit_bps: 1.0,
            taker_fee_bps: 0.0,
            ..Default::default()
        };
        config
            .per_symbol_position_limit
            .insert("BTC-USDT".to_string(), 0.5);
        let mut f = fixture(config);
        seed_spot_pair(&f);

        // Existing long of 0.5 leaves no room for the 1.0 buy leg.
        f.positions.write().set(
            Venue::Okx,
            "BTC-USDT",
            crate::types::PositionEntry {
                quantity: 0.5,
                notional_usd: 15_000.0,
            },
        );

        let consumer = f.bus.subscribe();
        f.detector.run_cycle();

        assert!(consumer.pop().is_none());
        assert!(f.detector.live_opportunities().is_empty());
        let snapshot = f.counters.snapshot();
        assert_eq!(snapshot.opportunities_detected, 0);
        assert_eq!(snapshot.opportunities_rejected, 1);
    }
}
