//! Demo runner: wires scripted sim adapters into the engine, feeds a few
//! seconds of synthetic market data containing deliberate dislocations,
//! and prints every accepted opportunity to stdout.

use std::sync::Arc;
use std::time::Duration;

use arb_engine::{
    BookKey, Clock, Detector, Dispatcher, DynError, EngineCounters, FundingRecord, InstrumentKind,
    MarketIndex, OpportunityBus, PolicyConfig, PositionSnapshot, SimAdapter, SystemClock, Ticker,
    Venue,
};
use parking_lot::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_RUNTIME_SECS: u64 = 5;

fn make_ticker(bid: f64, ask: f64, size: f64, ts: u64) -> Ticker {
    Ticker {
        bid,
        ask,
        bid_size: size,
        ask_size: size,
        last: (bid + ask) / 2.0,
        volume_24h: 1_000.0,
        funding_rate: None,
        expiry_us: None,
        timestamp_us: ts,
    }
}

#[tokio::main]
async fn main() -> Result<(), DynError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(PolicyConfig {
        min_profit_bps: 1.0,
        taker_fee_bps: 1.0,
        detection_interval_ms: 100,
        ..Default::default()
    });
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let index = Arc::new(MarketIndex::new());
    let counters = Arc::new(EngineCounters::new());
    let bus = Arc::new(OpportunityBus::new(config.max_opportunity_queue));
    let positions = Arc::new(RwLock::new(PositionSnapshot::new()));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&index),
        Arc::clone(&clock),
        Arc::clone(&config),
        Arc::clone(&counters),
    ));

    let okx = SimAdapter::new(Venue::Okx);
    let binance = SimAdapter::new(Venue::Binance);
    let okx_feed = okx.feed();
    let binance_feed = binance.feed();
    dispatcher.add_adapter(Box::new(okx));
    dispatcher.add_adapter(Box::new(binance));

    dispatcher
        .subscribe_all_venues("BTC-USDT", InstrumentKind::Spot)
        .await;
    dispatcher
        .subscribe_all_venues("BTC-USDT", InstrumentKind::Perpetual)
        .await;
    dispatcher.start().await?;

    let shutdown = dispatcher.shutdown_handle();

    // Consumer: print accepted opportunities as JSON lines.
    let consumer = bus.subscribe();
    let consumer_shutdown = Arc::clone(&shutdown);
    let consumer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consumer_shutdown.wait() => break,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
            for opportunity in consumer.pop_batch(64) {
                match serde_json::to_string(&opportunity) {
                    Ok(line) => println!("{line}"),
                    Err(err) => eprintln!("serialization failed: {err}"),
                }
            }
        }
    });

    let mut detector = Detector::new(
        Arc::clone(&index),
        Arc::clone(&bus),
        positions,
        Arc::clone(&clock),
        Arc::clone(&config),
        Arc::clone(&counters),
    );
    let detector_shutdown = Arc::clone(&shutdown);
    let detector_task = tokio::spawn(async move {
        detector.run(detector_shutdown).await;
    });

    // Feed a few seconds of quotes: okx sits 10 bps under binance, with
    // a funding-rate gap on the perpetuals.
    let feed_clock = Arc::clone(&clock);
    let feeder = tokio::spawn(async move {
        let spot_okx = BookKey::spot(Venue::Okx, "BTC-USDT");
        let spot_binance = BookKey::spot(Venue::Binance, "BTC-USDT");
        let perp_okx = BookKey::perpetual(Venue::Okx, "BTC-USDT");
        let perp_binance = BookKey::perpetual(Venue::Binance, "BTC-USDT");

        for tick in 0u64.. {
            let ts = feed_clock.wall_us();
            let mid = 30_000.0 + (tick % 20) as f64;

            okx_feed
                .ticker(spot_okx.clone(), make_ticker(mid - 5.0, mid - 3.0, 2.0, ts))
                .await;
            binance_feed
                .ticker(
                    spot_binance.clone(),
                    make_ticker(mid + 25.0, mid + 27.0, 2.0, ts),
                )
                .await;
            okx_feed
                .ticker(perp_okx.clone(), make_ticker(mid - 1.0, mid + 1.0, 2.0, ts))
                .await;
            binance_feed
                .ticker(
                    perp_binance.clone(),
                    make_ticker(mid - 1.0, mid + 1.0, 2.0, ts),
                )
                .await;
            okx_feed
                .funding(
                    perp_okx.clone(),
                    FundingRecord {
                        rate: 0.0009,
                        next_funding_us: None,
                        timestamp_us: ts,
                    },
                )
                .await;
            binance_feed
                .funding(
                    perp_binance.clone(),
                    FundingRecord {
                        rate: -0.0001,
                        next_funding_us: None,
                        timestamp_us: ts,
                    },
                )
                .await;

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = tokio::time::sleep(Duration::from_secs(DEMO_RUNTIME_SECS)) => {}
    }

    feeder.abort();
    dispatcher.stop().await;
    let _ = detector_task.await;
    let _ = consumer_task.await;

    let snapshot = counters.snapshot();
    info!(?snapshot, "engine counters at exit");
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
