//! Risk gating end to end: a position limit breach keeps the
//! opportunity off the bus entirely, and the reject reason is the
//! enumerated one.

use std::sync::Arc;

use arb_engine::{
    BookKey, Clock, Detector, EngineCounters, InstrumentKind, Leg, MarketIndex, Opportunity,
    OpportunityBus, OpportunityKind, PolicyConfig, PositionEntry, PositionSnapshot, RejectReason,
    RiskGate, Side, Ticker, Venue, VirtualClock,
};
use parking_lot::RwLock;

fn make_ticker(bid: f64, ask: f64, ts: u64) -> Ticker {
    Ticker {
        bid,
        ask,
        bid_size: 1.0,
        ask_size: 1.0,
        last: (bid + ask) / 2.0,
        volume_24h: 0.0,
        funding_rate: None,
        expiry_us: None,
        timestamp_us: ts,
    }
}

#[test]
fn test_position_limit_breach_is_not_delivered() {
    let mut config = PolicyConfig {
        min_profit_bps: 1.0,
        taker_fee_bps: 0.0,
        ..Default::default()
    };
    config
        .per_symbol_position_limit
        .insert("BTC-USDT".to_string(), 0.5);
    let config = Arc::new(config);

    let clock = Arc::new(VirtualClock::new(1_000_000));
    let index = Arc::new(MarketIndex::new());
    let counters = Arc::new(EngineCounters::new());
    let bus = Arc::new(OpportunityBus::new(16));
    let positions = Arc::new(RwLock::new(PositionSnapshot::new()));

    // Already long 0.5 BTC: the 1.0 buy leg would project to 1.5.
    positions.write().set(
        Venue::Okx,
        "BTC-USDT",
        PositionEntry {
            quantity: 0.5,
            notional_usd: 15_000.0,
        },
    );

    let ts = clock.wall_us();
    index.upsert_ticker(
        &BookKey::spot(Venue::Okx, "BTC-USDT"),
        make_ticker(30_000.0, 30_010.0, ts),
    );
    index.upsert_ticker(
        &BookKey::spot(Venue::Binance, "BTC-USDT"),
        make_ticker(30_020.0, 30_030.0, ts),
    );

    let mut detector = Detector::new(
        Arc::clone(&index),
        Arc::clone(&bus),
        positions,
        clock as Arc<dyn Clock>,
        config,
        Arc::clone(&counters),
    );
    let consumer = bus.subscribe();

    detector.run_cycle();

    assert!(consumer.pop().is_none());
    assert!(detector.live_opportunities().is_empty());

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.opportunities_detected, 0);
    assert_eq!(snapshot.opportunities_rejected, 1);
}

#[test]
fn test_reject_reason_is_position_limit() {
    let mut config = PolicyConfig::default();
    config
        .per_symbol_position_limit
        .insert("BTC-USDT".to_string(), 0.5);
    let gate = RiskGate::new(Arc::new(config));

    let mut positions = PositionSnapshot::new();
    positions.set(
        Venue::Okx,
        "BTC-USDT",
        PositionEntry {
            quantity: 0.5,
            notional_usd: 15_000.0,
        },
    );

    let opportunity = Opportunity {
        id: "SPOT-0-0".to_string(),
        created_at_ms: 0,
        ttl_ms: 500,
        kind: OpportunityKind::SpotCrossVenue,
        legs: vec![Leg {
            venue: Venue::Okx,
            symbol: "BTC-USDT".to_string(),
            kind: InstrumentKind::Spot,
            side: Side::Buy,
            price: 30_000.0,
            quantity: 1.0,
            synthetic: false,
        }],
        expected_profit: 10.0,
        profit_bps: 3.0,
        required_capital: 30_000.0,
        execution_risk: 0.1,
        funding_risk: 0.0,
        liquidity_score: 1.0,
        executable: true,
    };

    let reason = gate.check(&opportunity, &positions).unwrap_err();
    assert!(matches!(reason, RejectReason::PositionLimit { .. }));
    assert_eq!(reason.label(), "position_limit");
}
