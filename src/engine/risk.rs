//! Risk gate.
//!
//! A stateless policy check applied to every candidate opportunity before
//! it reaches the bus. Inputs are the opportunity, the caller-supplied
//! position snapshot and the immutable policy; the gate holds no state of
//! its own and is safe to call concurrently. Checks run in a fixed order
//! and the first failure wins.

use crate::config::PolicyConfig;
use crate::types::{Opportunity, PositionSnapshot, Venue};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Why an opportunity was rejected.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum RejectReason {
    #[error("execution risk {risk:.3} exceeds limit {limit:.3}")]
    ExecutionRisk { risk: f64, limit: f64 },

    #[error("funding risk {risk:.5} exceeds limit {limit:.5}")]
    FundingRisk { risk: f64, limit: f64 },

    #[error("liquidity score {score:.3} below minimum {minimum:.3}")]
    Liquidity { score: f64, minimum: f64 },

    #[error("position limit breached for {symbol}: |{projected:.4}| > {limit:.4}")]
    PositionLimit {
        symbol: String,
        projected: f64,
        limit: f64,
    },

    #[error("venue exposure limit breached on {venue}: {projected:.2} > {limit:.2}")]
    VenueExposure {
        venue: Venue,
        projected: f64,
        limit: f64,
    },

    #[error("portfolio exposure {projected:.2} exceeds cap {limit:.2}")]
    PortfolioExposure { projected: f64, limit: f64 },
}

impl RejectReason {
    /// Stable label for counters and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::ExecutionRisk { .. } => "execution_risk",
            RejectReason::FundingRisk { .. } => "funding_risk",
            RejectReason::Liquidity { .. } => "liquidity",
            RejectReason::PositionLimit { .. } => "position_limit",
            RejectReason::VenueExposure { .. } => "venue_exposure",
            RejectReason::PortfolioExposure { .. } => "portfolio_exposure",
        }
    }
}

pub struct RiskGate {
    config: Arc<PolicyConfig>,
}

impl RiskGate {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    /// Accept or reject one opportunity against the supplied portfolio
    /// snapshot. First failing check wins.
    pub fn check(
        &self,
        opportunity: &Opportunity,
        positions: &PositionSnapshot,
    ) -> Result<(), RejectReason> {
        let config = &self.config;

        if opportunity.execution_risk > config.max_execution_risk {
            return Err(RejectReason::ExecutionRisk {
                risk: opportunity.execution_risk,
                limit: config.max_execution_risk,
            });
        }

        // Funding exposure only matters when a perpetual is in play.
        if opportunity.touches_perpetual() && opportunity.funding_risk > config.max_funding_risk {
            return Err(RejectReason::FundingRisk {
                risk: opportunity.funding_risk,
                limit: config.max_funding_risk,
            });
        }

        if opportunity.liquidity_score < config.min_liquidity_score {
            return Err(RejectReason::Liquidity {
                score: opportunity.liquidity_score,
                minimum: config.min_liquidity_score,
            });
        }

        for leg in &opportunity.legs {
            let limit = config.position_limit(&leg.symbol);
            let projected = positions.position_for_symbol(&leg.symbol) + leg.signed_quantity();
            if projected.abs() > limit {
                return Err(RejectReason::PositionLimit {
                    symbol: leg.symbol.clone(),
                    projected,
                    limit,
                });
            }
        }

        for venue in opportunity.venues() {
            let Some(&limit) = config.per_venue_exposure_limit.get(&venue) else {
                continue;
            };
            let added: f64 = opportunity
                .legs
                .iter()
                .filter(|l| l.venue == venue)
                .map(|l| l.notional())
                .sum();
            let projected = positions.venue_exposure(venue) + added;
            if projected > limit {
                return Err(RejectReason::VenueExposure {
                    venue,
                    projected,
                    limit,
                });
            }
        }

        let projected_total = positions.total_exposure() + opportunity.required_capital;
        if projected_total > config.max_portfolio_exposure_usd {
            return Err(RejectReason::PortfolioExposure {
                projected: projected_total,
                limit: config.max_portfolio_exposure_usd,
            });
        }

        Ok(())
    }
}
