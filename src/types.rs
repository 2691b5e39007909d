//! Core market-data and opportunity types shared across the engine.
//!
//! Everything here is a plain value: venues, instrument kinds, index keys,
//! price levels, tickers, normalized ingest events and the opportunity
//! records handed to consumers. Ownership of live state (books, tickers)
//! belongs to the `MarketIndex`; these types only move by value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Comparison tolerance for f64 prices and quantities.
pub const EPSILON: f64 = 1e-9;

/// One basis point as a fraction.
pub const BASIS_POINT: f64 = 1e-4;

/// Approximate equality under [`EPSILON`].
#[inline(always)]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Venue-normalized instrument identifier (e.g. "BTC-USDT").
pub type Symbol = String;

// ============================================================================
// Venues & instruments
// ============================================================================

/// Supported trading venues. Closed set; adapters are selected per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Okx,
    Binance,
    Bybit,
}

impl Venue {
    pub const ALL: [Venue; 3] = [Venue::Okx, Venue::Binance, Venue::Bybit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Okx => "okx",
            Venue::Binance => "binance",
            Venue::Bybit => "bybit",
        }
    }

    /// Fixed ordering used as the final tie-break in cross-venue
    /// aggregation. Lower wins.
    #[inline(always)]
    pub fn priority(&self) -> u8 {
        match self {
            Venue::Okx => 0,
            Venue::Binance => 1,
            Venue::Bybit => 2,
        }
    }

    /// Dense index for per-venue lookup tables.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.priority() as usize
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument kind of a tradeable market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Spot,
    Perpetual,
    Future,
    Option,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Spot => "spot",
            InstrumentKind::Perpetual => "perpetual",
            InstrumentKind::Future => "future",
            InstrumentKind::Option => "option",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    #[inline(always)]
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Primary index key: one market on one venue.
///
/// Equality is structural; this is the addressing unit of the
/// `MarketIndex` and of every normalized ingest event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookKey {
    pub venue: Venue,
    pub symbol: Symbol,
    pub kind: InstrumentKind,
}

impl BookKey {
    pub fn new(venue: Venue, symbol: impl Into<Symbol>, kind: InstrumentKind) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            kind,
        }
    }

    pub fn spot(venue: Venue, symbol: impl Into<Symbol>) -> Self {
        Self::new(venue, symbol, InstrumentKind::Spot)
    }

    pub fn perpetual(venue: Venue, symbol: impl Into<Symbol>) -> Self {
        Self::new(venue, symbol, InstrumentKind::Perpetual)
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.venue, self.symbol, self.kind)
    }
}

// ============================================================================
// Market data values
// ============================================================================

/// One ladder level. A level arriving with `quantity == 0` means
/// "remove this price".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
    pub order_count: u32,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self {
            price,
            quantity,
            order_count: 1,
        }
    }

    pub fn with_count(price: f64, quantity: f64, order_count: u32) -> Self {
        Self {
            price,
            quantity,
            order_count,
        }
    }
}

/// Top-of-book ticker for one market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub last: f64,
    pub volume_24h: f64,
    /// Current funding rate, perpetuals only.
    pub funding_rate: Option<f64>,
    /// Expiry in microseconds since epoch, dated futures only.
    pub expiry_us: Option<u64>,
    /// Event timestamp in microseconds.
    pub timestamp_us: u64,
}

impl Ticker {
    #[inline(always)]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    #[inline(always)]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    #[inline(always)]
    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid > EPSILON {
            self.spread() / mid * 10_000.0
        } else {
            0.0
        }
    }

    /// Both sides quoted and not crossed.
    #[inline(always)]
    pub fn is_quoted(&self) -> bool {
        self.bid > EPSILON && self.ask > EPSILON && self.bid <= self.ask + EPSILON
    }
}

/// A single trade print. Consumed for last-trade statistics only; trades
/// never mutate the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    pub timestamp_us: u64,
}

/// Funding-rate record for a perpetual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub rate: f64,
    /// Next funding settlement in microseconds since epoch, if known.
    pub next_funding_us: Option<u64>,
    pub timestamp_us: u64,
}

/// Per-venue connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Normalized events an adapter delivers to the core.
///
/// Adapters guarantee per-key ordering; across keys nothing is guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    BookSnapshot {
        key: BookKey,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        seq: Option<u64>,
        timestamp_us: u64,
    },
    BookDelta {
        key: BookKey,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        seq: Option<u64>,
        timestamp_us: u64,
    },
    TickerUpdate {
        key: BookKey,
        ticker: Ticker,
    },
    Trade {
        key: BookKey,
        trade: Trade,
    },
    FundingUpdate {
        key: BookKey,
        funding: FundingRecord,
    },
    StateChange {
        venue: Venue,
        state: ConnectionState,
        reason: Option<String>,
    },
}

// ============================================================================
// Opportunities
// ============================================================================

/// The four opportunity classes the detector scans for, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityKind {
    SpotCrossVenue,
    SyntheticMispricing,
    FundingSpread,
    CalendarSpread,
}

impl OpportunityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            OpportunityKind::SpotCrossVenue => "SPOT",
            OpportunityKind::SyntheticMispricing => "SYNTHETIC",
            OpportunityKind::FundingSpread => "FUNDING",
            OpportunityKind::CalendarSpread => "CALENDAR",
        }
    }
}

/// One leg of an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub venue: Venue,
    pub symbol: Symbol,
    pub kind: InstrumentKind,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    /// True if this leg prices a synthetic construction rather than a real
    /// quoted instrument.
    pub synthetic: bool,
}

impl Leg {
    /// Quantity signed by side: buys positive, sells negative.
    #[inline(always)]
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }

    /// Absolute USD notional of the leg.
    #[inline(always)]
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// A detected arbitrage opportunity, handed by value to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Unique within a process lifetime; see [`next_opportunity_id`].
    pub id: String,
    /// Wall-clock creation time in milliseconds since epoch.
    pub created_at_ms: u64,
    /// Time to live; the opportunity is stale past `created_at_ms + ttl_ms`.
    pub ttl_ms: u64,
    pub kind: OpportunityKind,
    pub legs: Vec<Leg>,
    /// Net profit in USD after the per-leg fee schedule.
    pub expected_profit: f64,
    pub profit_bps: f64,
    pub required_capital: f64,
    /// Heuristic in [0, 1].
    pub execution_risk: f64,
    pub funding_risk: f64,
    /// Top-of-book depth relative to leg quantity, in [0, 1].
    pub liquidity_score: f64,
    pub executable: bool,
}

impl Opportunity {
    #[inline(always)]
    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    #[inline(always)]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms()
    }

    /// True when any leg is a perpetual (funding-risk checks apply).
    pub fn touches_perpetual(&self) -> bool {
        self.legs
            .iter()
            .any(|l| l.kind == InstrumentKind::Perpetual)
    }

    /// Distinct venues referenced by the legs, in leg order.
    pub fn venues(&self) -> Vec<Venue> {
        let mut venues = Vec::with_capacity(self.legs.len());
        for leg in &self.legs {
            if !venues.contains(&leg.venue) {
                venues.push(leg.venue);
            }
        }
        venues
    }
}

static OPPORTUNITY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a process-unique opportunity id.
///
/// A tag-plus-timestamp id alone collides under sub-microsecond emission,
/// so a process-wide monotonic sequence is folded in.
pub fn next_opportunity_id(kind: OpportunityKind, wall_us: u64) -> String {
    let seq = OPPORTUNITY_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", kind.tag(), seq, wall_us)
}

// ============================================================================
// Positions
// ============================================================================

/// Exposure contributed by the host for one (venue, symbol).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Signed base quantity; long positive, short negative.
    pub quantity: f64,
    /// Absolute USD notional of the position.
    pub notional_usd: f64,
}

/// Read-only snapshot of current exposure, consumed by the risk gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    entries: HashMap<(Venue, Symbol), PositionEntry>,
}

impl PositionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, venue: Venue, symbol: impl Into<Symbol>, entry: PositionEntry) {
        self.entries.insert((venue, symbol.into()), entry);
    }

    /// Signed net position in a symbol summed across venues.
    pub fn position_for_symbol(&self, symbol: &str) -> f64 {
        self.entries
            .iter()
            .filter(|((_, s), _)| s == symbol)
            .map(|(_, e)| e.quantity)
            .sum()
    }

    /// Absolute USD exposure on one venue.
    pub fn venue_exposure(&self, venue: Venue) -> f64 {
        self.entries
            .iter()
            .filter(|((v, _), _)| *v == venue)
            .map(|(_, e)| e.notional_usd)
            .sum()
    }

    /// Total absolute USD exposure across the portfolio.
    pub fn total_exposure(&self) -> f64 {
        self.entries.values().map(|e| e.notional_usd).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
