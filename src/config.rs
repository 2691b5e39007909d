//! Policy configuration.
//!
//! One immutable `PolicyConfig` is supplied at construction and shared by
//! the detector, risk gate and dispatcher. There is no hot reload; changing
//! policy means restarting the engine.

use crate::error::ConfigError;
use crate::types::{Symbol, Venue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime thresholds, limits and intervals.
///
/// Defaults mirror the production values this engine has been run with.
/// Unknown fields are rejected when deserializing, so a typoed option fails
/// at startup instead of being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyConfig {
    /// Minimum net profit, in bps, for an opportunity to be emitted.
    pub min_profit_bps: f64,
    /// Default opportunity time-to-live in milliseconds.
    pub opportunity_ttl_ms: u64,
    /// Hard cap on a single position, USD.
    pub max_position_size_usd: f64,
    /// Hard cap on total portfolio exposure, USD.
    pub max_portfolio_exposure_usd: f64,
    /// Per-symbol position limits in base quantity. Symbols not listed fall
    /// back to `default_position_limit`.
    pub per_symbol_position_limit: HashMap<Symbol, f64>,
    /// Per-venue exposure limits in USD. Venues not listed are unlimited.
    pub per_venue_exposure_limit: HashMap<Venue, f64>,
    /// Fallback per-symbol position limit.
    pub default_position_limit: f64,
    /// Maximum tolerated execution risk, in [0, 1].
    pub max_execution_risk: f64,
    /// Maximum tolerated funding-rate exposure per interval.
    pub max_funding_risk: f64,
    /// Minimum tolerated liquidity score, in [0, 1].
    pub min_liquidity_score: f64,
    pub taker_fee_bps: f64,
    pub maker_fee_bps: f64,
    /// Detection cycle period.
    pub detection_interval_ms: u64,
    /// Bound on the detector's live list and the default bus ring size.
    pub max_opportunity_queue: usize,
    /// Market data older than this is skipped for the cycle.
    pub stale_after_ms: u64,
    /// Funding settlements per day; 3 means 8-hour intervals.
    pub funding_intervals_per_day: u32,
    /// Annualized risk-free rate used in cost-of-carry pricing.
    pub risk_free_rate: f64,
    /// Annualized storage/convenience adjustment for cost-of-carry.
    pub carry_cost: f64,
    /// Ladder depth used for imbalance and liquidity scoring.
    pub top_depth: usize,
    /// Initial reconnect backoff.
    pub reconnect_base_ms: u64,
    /// Backoff ceiling.
    pub reconnect_max_ms: u64,
    /// Reconnect attempts before a venue is marked failed.
    pub max_reconnect_attempts: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_profit_bps: 10.0,
            opportunity_ttl_ms: 500,
            max_position_size_usd: 100_000.0,
            max_portfolio_exposure_usd: 1_000_000.0,
            per_symbol_position_limit: HashMap::new(),
            per_venue_exposure_limit: HashMap::new(),
            default_position_limit: 50_000.0,
            max_execution_risk: 0.7,
            max_funding_risk: 0.01,
            min_liquidity_score: 0.7,
            taker_fee_bps: 4.0,
            maker_fee_bps: 2.0,
            detection_interval_ms: 100,
            max_opportunity_queue: 1024,
            stale_after_ms: 5_000,
            funding_intervals_per_day: 3,
            risk_free_rate: 0.05,
            carry_cost: 0.0,
            top_depth: 5,
            reconnect_base_ms: 250,
            reconnect_max_ms: 10_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl PolicyConfig {
    /// Validate the policy. Called once at engine construction; any failure
    /// is fatal to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::NonPositive { field, value })
            }
        }
        fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::OutOfUnitRange { field, value })
            }
        }

        positive("min_profit_bps", self.min_profit_bps)?;
        positive("max_position_size_usd", self.max_position_size_usd)?;
        positive("max_portfolio_exposure_usd", self.max_portfolio_exposure_usd)?;
        positive("default_position_limit", self.default_position_limit)?;
        unit_range("max_execution_risk", self.max_execution_risk)?;
        positive("max_funding_risk", self.max_funding_risk)?;
        unit_range("min_liquidity_score", self.min_liquidity_score)?;

        if self.taker_fee_bps < 0.0 {
            return Err(ConfigError::NonPositive {
                field: "taker_fee_bps",
                value: self.taker_fee_bps,
            });
        }
        if self.maker_fee_bps < 0.0 {
            return Err(ConfigError::NonPositive {
                field: "maker_fee_bps",
                value: self.maker_fee_bps,
            });
        }

        if self.opportunity_ttl_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "opportunity_ttl_ms",
            });
        }
        if self.detection_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "detection_interval_ms",
            });
        }
        if self.stale_after_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "stale_after_ms",
            });
        }
        if self.max_opportunity_queue == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "max_opportunity_queue",
            });
        }
        if self.funding_intervals_per_day == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "funding_intervals_per_day",
            });
        }
        if self.top_depth == 0 {
            return Err(ConfigError::ZeroDuration { field: "top_depth" });
        }
        if self.reconnect_base_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "reconnect_base_ms",
            });
        }

        for (symbol, limit) in &self.per_symbol_position_limit {
            if *limit < 0.0 {
                return Err(ConfigError::NonPositiveEntry {
                    field: "per_symbol_position_limit",
                    key: symbol.clone(),
                    value: *limit,
                });
            }
        }
        for (venue, limit) in &self.per_venue_exposure_limit {
            if *limit <= 0.0 {
                return Err(ConfigError::NonPositiveEntry {
                    field: "per_venue_exposure_limit",
                    key: venue.to_string(),
                    value: *limit,
                });
            }
        }

        Ok(())
    }

    /// Length of one funding interval in milliseconds.
    #[inline(always)]
    pub fn funding_interval_ms(&self) -> u64 {
        86_400_000 / self.funding_intervals_per_day as u64
    }

    /// Position limit for a symbol, falling back to the default.
    #[inline(always)]
    pub fn position_limit(&self, symbol: &str) -> f64 {
        self.per_symbol_position_limit
            .get(symbol)
            .copied()
            .unwrap_or(self.default_position_limit)
    }
}
