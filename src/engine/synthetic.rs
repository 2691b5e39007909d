//! Fair-value models for synthetic and derivative pricing.
//!
//! Every model returns `Option<f64>`: a missing ticker, an empty book or a
//! degenerate input yields `None`, which the detector reads as "skip this
//! candidate this cycle". No model ever blocks; all inputs are copied out
//! of the index.

use crate::clock::Clock;
use crate::config::PolicyConfig;
use crate::market::index::MarketIndex;
use crate::types::{BookKey, InstrumentKind, Side, Venue, EPSILON};
use std::sync::Arc;

/// Days per year used for cost-of-carry time scaling.
const DAYS_PER_YEAR: f64 = 365.25;

/// One leg of a multi-leg synthetic construction.
#[derive(Debug, Clone)]
pub struct SyntheticLeg {
    pub key: BookKey,
    pub side: Side,
    pub weight: f64,
}

pub struct SyntheticPricer {
    index: Arc<MarketIndex>,
    clock: Arc<dyn Clock>,
    risk_free_rate: f64,
    carry_cost: f64,
    funding_intervals_per_day: u32,
}

impl SyntheticPricer {
    pub fn new(index: Arc<MarketIndex>, clock: Arc<dyn Clock>, config: &PolicyConfig) -> Self {
        Self {
            index,
            clock,
            risk_free_rate: config.risk_free_rate,
            carry_cost: config.carry_cost,
            funding_intervals_per_day: config.funding_intervals_per_day,
        }
    }

    fn funding_interval_hours(&self) -> f64 {
        24.0 / self.funding_intervals_per_day as f64
    }

    /// Basis of a derivative against spot on one venue, in bps of spot.
    pub fn basis_bps(&self, symbol: &str, kind: InstrumentKind, venue: Venue) -> Option<f64> {
        let spot_mid = self.index.mid(&BookKey::spot(venue, symbol))?;
        let derived_mid = self.index.mid(&BookKey::new(venue, symbol, kind))?;
        if spot_mid < EPSILON {
            return None;
        }
        Some((derived_mid - spot_mid) / spot_mid * 10_000.0)
    }

    /// Annualized funding rate implied by the perpetual-spot basis,
    /// assuming the configured number of funding intervals per day.
    pub fn implied_funding(&self, symbol: &str, venue: Venue) -> Option<f64> {
        let basis = self.basis_bps(symbol, InstrumentKind::Perpetual, venue)?;
        Some(basis * 365.0 * self.funding_intervals_per_day as f64 / 10_000.0)
    }

    /// Synthetic spot derived from the perpetual, discounting the funding
    /// paid over the holding period.
    pub fn synthetic_spot_from_perp(
        &self,
        symbol: &str,
        venue: Venue,
        holding_hours: f64,
    ) -> Option<f64> {
        let key = BookKey::perpetual(venue, symbol);
        let perp_mid = self.index.mid(&key)?;
        let funding_rate = self
            .index
            .get_funding(&key)
            .map(|f| f.rate)
            .or_else(|| self.index.get_ticker(&key).and_then(|t| t.funding_rate))?;

        let intervals = holding_hours / self.funding_interval_hours();
        Some(perp_mid * (1.0 - funding_rate * intervals))
    }

    /// Cost-of-carry fair value of a dated future: `S * e^((r + c) * T)`.
    pub fn futures_fair_value(&self, symbol: &str, venue: Venue, expiry_us: u64) -> Option<f64> {
        let spot_mid = self.index.mid(&BookKey::spot(venue, symbol))?;
        let t = self.years_to_expiry(expiry_us)?;
        Some(spot_mid * ((self.risk_free_rate + self.carry_cost) * t).exp())
    }

    /// Interest rate implied by a futures price: `ln(F/S) / T`.
    pub fn implied_rate(&self, futures_price: f64, spot_price: f64, expiry_us: u64) -> Option<f64> {
        if spot_price < EPSILON || futures_price < EPSILON {
            return None;
        }
        let t = self.years_to_expiry(expiry_us)?;
        Some((futures_price / spot_price).ln() / t)
    }

    /// Price of a multi-leg synthetic: the sum of each leg's executable
    /// price (ask for buys, bid for sells) times its weight.
    pub fn multi_leg(&self, legs: &[SyntheticLeg]) -> Option<f64> {
        if legs.is_empty() {
            return None;
        }
        let mut price = 0.0;
        for leg in legs {
            let quote = self.index.get_top_of_book(&leg.key)?;
            if !quote.is_quoted() {
                return None;
            }
            let leg_price = match leg.side {
                Side::Buy => quote.ask,
                Side::Sell => quote.bid,
            };
            price += leg_price * leg.weight;
        }
        Some(price)
    }

    /// Synthetic-vs-real mispricing of the perpetual against spot on one
    /// venue, in bps of spot. Positive means the perpetual is rich.
    pub fn perp_mispricing_bps(
        &self,
        symbol: &str,
        spot_venue: Venue,
        perp_venue: Venue,
        holding_hours: f64,
    ) -> Option<f64> {
        let spot_mid = self.index.mid(&BookKey::spot(spot_venue, symbol))?;
        if spot_mid < EPSILON {
            return None;
        }
        let synthetic = self.synthetic_spot_from_perp(symbol, perp_venue, holding_hours)?;
        Some((synthetic - spot_mid) / spot_mid * 10_000.0)
    }

    fn years_to_expiry(&self, expiry_us: u64) -> Option<f64> {
        let now_us = self.clock.wall_us();
        if expiry_us <= now_us {
            return None;
        }
        let days = (expiry_us - now_us) as f64 / 86_400_000_000.0;
        Some(days / DAYS_PER_YEAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::types::{FundingRecord, Ticker};

    const DAY_US: u64 = 86_400_000_000;

    fn make_ticker(bid: f64, ask: f64) -> Ticker {
        Ticker {
            bid,
            ask,
            bid_size: 1.0,
            ask_size: 1.0,
            last: (bid + ask) / 2.0,
            volume_24h: 0.0,
            funding_rate: None,
            expiry_us: None,
            timestamp_us: 1,
        }
    }

    fn setup() -> (Arc<MarketIndex>, Arc<VirtualClock>, SyntheticPricer) {
        let index = Arc::new(MarketIndex::new());
        let clock = Arc::new(VirtualClock::new(0));
        let pricer = SyntheticPricer::new(
            Arc::clone(&index),
            clock.clone() as Arc<dyn Clock>,
            &PolicyConfig::default(),
        );
        (index, clock, pricer)
    }

    #[test]
    fn test_basis_bps() {
        let (index, _clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Okx, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );
        index.upsert_ticker(
            &BookKey::perpetual(Venue::Okx, "BTC-USDT"),
            make_ticker(30_025.0, 30_035.0),
        );

        // (30030 - 30000) / 30000 * 1e4 = 10 bps
        let basis = pricer
            .basis_bps("BTC-USDT", InstrumentKind::Perpetual, Venue::Okx)
            .unwrap();
        assert!((basis - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_basis_missing_leg_is_none() {
        let (index, _clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Okx, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );
        assert!(pricer
            .basis_bps("BTC-USDT", InstrumentKind::Perpetual, Venue::Okx)
            .is_none());
    }

    #[test]
    fn test_implied_funding_annualizes_basis() {
        let (index, _clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Okx, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );
        index.upsert_ticker(
            &BookKey::perpetual(Venue::Okx, "BTC-USDT"),
            make_ticker(30_025.0, 30_035.0),
        );

        // 10 bps basis * 365 * 3 / 1e4
        let implied = pricer.implied_funding("BTC-USDT", Venue::Okx).unwrap();
        assert!((implied - 10.0 * 365.0 * 3.0 / 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_synthetic_spot_discounts_funding() {
        let (index, _clock, pricer) = setup();
        let perp = BookKey::perpetual(Venue::Bybit, "BTC-USDT");
        index.upsert_ticker(&perp, make_ticker(29_995.0, 30_005.0));
        index.upsert_funding(
            &perp,
            FundingRecord {
                rate: 0.0004,
                next_funding_us: None,
                timestamp_us: 1,
            },
        );

        // One 8h interval held: 30000 * (1 - 0.0004)
        let synthetic = pricer
            .synthetic_spot_from_perp("BTC-USDT", Venue::Bybit, 8.0)
            .unwrap();
        assert!((synthetic - 30_000.0 * (1.0 - 0.0004)).abs() < 1e-6);

        // Half an interval held.
        let synthetic = pricer
            .synthetic_spot_from_perp("BTC-USDT", Venue::Bybit, 4.0)
            .unwrap();
        assert!((synthetic - 30_000.0 * (1.0 - 0.0002)).abs() < 1e-6);
    }

    #[test]
    fn test_futures_fair_value_cost_of_carry() {
        let (index, _clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Binance, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );

        // 365.25 days out at r = 5%: exactly one year of carry.
        let expiry = (DAYS_PER_YEAR * DAY_US as f64) as u64;
        let fair = pricer
            .futures_fair_value("BTC-USDT", Venue::Binance, expiry)
            .unwrap();
        assert!((fair - 30_000.0 * 0.05f64.exp()).abs() < 1e-3);
    }

    #[test]
    fn test_expired_future_has_no_fair_value() {
        let (index, clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Binance, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );
        clock.advance_us(10 * DAY_US);
        assert!(pricer
            .futures_fair_value("BTC-USDT", Venue::Binance, 5 * DAY_US)
            .is_none());
    }

    #[test]
    fn test_implied_rate_inverts_fair_value() {
        let (index, _clock, pricer) = setup();
        index.upsert_ticker(
            &BookKey::spot(Venue::Binance, "BTC-USDT"),
            make_ticker(29_995.0, 30_005.0),
        );

        let expiry = (DAYS_PER_YEAR * DAY_US as f64) as u64;
        let fair = pricer
            .futures_fair_value("BTC-USDT", Venue::Binance, expiry)
            .unwrap();
        let rate = pricer.implied_rate(fair, 30_000.0, expiry).unwrap();
        assert!((rate - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_multi_leg_uses_executable_sides() {
        let (index, _clock, pricer) = setup();
        let spot = BookKey::spot(Venue::Okx, "BTC-USDT");
        let perp = BookKey::perpetual(Venue::Okx, "BTC-USDT");
        index.upsert_ticker(&spot, make_ticker(30_000.0, 30_010.0));
        index.upsert_ticker(&perp, make_ticker(30_020.0, 30_030.0));

        let legs = vec![
            SyntheticLeg {
                key: spot,
                side: Side::Buy,
                weight: 1.0,
            },
            SyntheticLeg {
                key: perp,
                side: Side::Sell,
                weight: -1.0,
            },
        ];
        // buy spot at ask 30010, sell perp at bid 30020 weighted -1
        let price = pricer.multi_leg(&legs).unwrap();
        assert!((price - (30_010.0 - 30_020.0)).abs() < 1e-9);
    }

    #[test]
    fn test_multi_leg_missing_leg_is_none() {
        let (_index, _clock, pricer) = setup();
        let legs = vec![SyntheticLeg {
            key: BookKey::spot(Venue::Okx, "MISSING"),
            side: Side::Buy,
            weight: 1.0,
        }];
        assert!(pricer.multi_leg(&legs).is_none());
    }
}
