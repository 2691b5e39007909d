//! Lifecycle laws: idempotent start/stop, cancellation reaching every
//! task, subscription teardown restoring the index, and invalid policy
//! refusing to start.

use std::sync::Arc;
use std::time::Duration;

use arb_engine::{
    BookKey, Clock, ConnectionState, Detector, Dispatcher, EngineCounters, EngineError,
    InstrumentKind, MarketIndex, OpportunityBus, PolicyConfig, PositionSnapshot, SimAdapter,
    SystemClock, Ticker, Venue,
};
use parking_lot::RwLock;

fn make_ticker(ts: u64) -> Ticker {
    Ticker {
        bid: 30_000.0,
        ask: 30_010.0,
        bid_size: 1.0,
        ask_size: 1.0,
        last: 30_005.0,
        volume_24h: 0.0,
        funding_rate: None,
        expiry_us: None,
        timestamp_us: ts,
    }
}

fn build_dispatcher(config: PolicyConfig) -> (Arc<Dispatcher>, Arc<MarketIndex>) {
    let index = Arc::new(MarketIndex::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&index),
        Arc::new(SystemClock::new()) as Arc<dyn Clock>,
        Arc::new(config),
        Arc::new(EngineCounters::new()),
    ));
    (dispatcher, index)
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (dispatcher, _index) = build_dispatcher(PolicyConfig::default());
    let adapter = SimAdapter::new(Venue::Okx);
    dispatcher.add_adapter(Box::new(adapter));

    dispatcher.start().await.unwrap();
    dispatcher.start().await.unwrap();

    assert_eq!(
        dispatcher.state()[&Venue::Okx],
        ConnectionState::Connected
    );

    dispatcher.stop().await;
    dispatcher.stop().await;

    assert_eq!(
        dispatcher.state()[&Venue::Okx],
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_concurrent_stops_both_return() {
    let (dispatcher, _index) = build_dispatcher(PolicyConfig::default());
    dispatcher.add_adapter(Box::new(SimAdapter::new(Venue::Okx)));
    dispatcher.start().await.unwrap();

    let a = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.stop().await })
    };
    let b = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.stop().await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        a.await.unwrap();
        b.await.unwrap();
    })
    .await
    .expect("both stops must complete");
}

#[tokio::test]
async fn test_invalid_policy_refuses_to_start() {
    let (dispatcher, _index) = build_dispatcher(PolicyConfig {
        detection_interval_ms: 0,
        ..Default::default()
    });
    dispatcher.add_adapter(Box::new(SimAdapter::new(Venue::Okx)));

    let err = dispatcher.start().await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn test_unsubscribe_restores_index() {
    let (dispatcher, index) = build_dispatcher(PolicyConfig::default());
    let adapter = SimAdapter::new(Venue::Okx);
    let feed = adapter.feed();
    dispatcher.add_adapter(Box::new(adapter));

    dispatcher
        .subscribe_all_venues("BTC-USDT", InstrumentKind::Spot)
        .await;
    dispatcher.start().await.unwrap();
    assert!(feed.is_subscribed("BTC-USDT", InstrumentKind::Spot));

    let key = BookKey::spot(Venue::Okx, "BTC-USDT");
    feed.ticker(key.clone(), make_ticker(1_000)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(index.get_ticker(&key).is_some());

    dispatcher.unsubscribe_all().await;

    assert!(!feed.is_subscribed("BTC-USDT", InstrumentKind::Spot));
    assert!(index.get_ticker(&key).is_none());
    assert!(index.is_empty());

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_detector_and_clears_state() {
    let config = Arc::new(PolicyConfig {
        detection_interval_ms: 20,
        ..Default::default()
    });
    let index = Arc::new(MarketIndex::new());
    let counters = Arc::new(EngineCounters::new());
    let bus = Arc::new(OpportunityBus::new(16));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&index),
        Arc::new(SystemClock::new()) as Arc<dyn Clock>,
        Arc::clone(&config),
        Arc::clone(&counters),
    ));

    let adapter = SimAdapter::new(Venue::Okx);
    let feed = adapter.feed();
    dispatcher.add_adapter(Box::new(adapter));
    dispatcher.start().await.unwrap();

    let key = BookKey::spot(Venue::Okx, "BTC-USDT");
    feed.ticker(key.clone(), make_ticker(1_000)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!index.is_empty());

    let mut detector = Detector::new(
        Arc::clone(&index),
        bus,
        Arc::new(RwLock::new(PositionSnapshot::new())),
        Arc::new(SystemClock::new()) as Arc<dyn Clock>,
        config,
        counters,
    );
    let shutdown = dispatcher.shutdown_handle();
    let detector_task = tokio::spawn(async move {
        detector.run(shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    dispatcher.stop().await;

    // Cancellation propagated: the detector task winds down on its own.
    tokio::time::timeout(Duration::from_secs(2), detector_task)
        .await
        .expect("detector must observe shutdown")
        .unwrap();

    // A stopped engine holds no market state.
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_state_reports_per_venue() {
    let (dispatcher, _index) = build_dispatcher(PolicyConfig::default());
    let okx = SimAdapter::new(Venue::Okx);
    let bybit = SimAdapter::new(Venue::Bybit);
    let bybit_feed = bybit.feed();
    bybit_feed.set_fail_connect(true);

    dispatcher.add_adapter(Box::new(okx));
    dispatcher.add_adapter(Box::new(bybit));
    dispatcher.start().await.unwrap();

    let state = dispatcher.state();
    assert_eq!(state[&Venue::Okx], ConnectionState::Connected);
    assert_ne!(state[&Venue::Bybit], ConnectionState::Connected);
    assert_eq!(dispatcher.healthy_venues(), vec![Venue::Okx]);

    dispatcher.stop().await;
}
