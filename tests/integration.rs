//! End-to-end host flow: scan, market data through the paper exchange,
//! orders and fills on the bus, position veto on removal.
//!
//! Run with: cargo test --test integration

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use event_bus::{Engine, EventType, HandlerResult, NotificationRelay, NotificationSink};
use exchange_connectors::{PaperExchange, PaperExchangeConfig, RoutingConfig};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scan_trader::prelude::*;
use scan_trader_core::{KlineData, LogLevel};

const SYMBOL: &str = "US.AMD";

fn momentum() -> MomentumConfig {
    MomentumConfig {
        rsi_period: 3,
        ema_fast_period: 2,
        ema_slow_period: 4,
        order_quantity: dec!(5),
        ..MomentumConfig::default()
    }
}

fn scanner_config(watchlist: &[&str]) -> ScannerConfig {
    ScannerConfig {
        watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
        ..ScannerConfig::default()
    }
}

fn settle(engine: &Engine) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut last = engine.processed_event_count();
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        let now = engine.processed_event_count();
        if now == last && engine.event_queue_size() == 0 {
            return;
        }
        last = now;
    }
}

fn push(paper: &PaperExchange, engine: &Engine, close: i64) {
    paper.push_kline(KlineData::flat(SYMBOL, "1m", Decimal::from(close)));
    settle(engine);
}

type Notes = Arc<Mutex<Vec<(LogLevel, String)>>>;

struct CollectingSink(Notes);

impl NotificationSink for CollectingSink {
    fn notify(&self, level: LogLevel, message: &str, _timestamp: DateTime<Utc>) -> HandlerResult {
        self.0.lock().push((level, message.to_string()));
        Ok(())
    }
}

struct Setup {
    host: TradingHost,
    paper: Arc<PaperExchange>,
    notes: Notes,
}

fn setup() -> Setup {
    let notes: Notes = Arc::default();
    let builder = TradingHost::builder(EngineConfig::default())
        .factory(MomentumStrategy::factory(momentum()))
        .handler(
            EventType::Log,
            Arc::new(NotificationRelay::new(CollectingSink(Arc::clone(&notes)), LogLevel::Info)),
        );
    let paper = Arc::new(PaperExchange::new(
        PaperExchangeConfig {
            name: "paper".into(),
            initial_prices: HashMap::from([(SYMBOL.to_string(), dec!(20))]),
            ..PaperExchangeConfig::default()
        },
        builder.engine(),
    ));
    let host = builder.exchange(paper.clone()).build().unwrap();
    host.start().unwrap();
    Setup { host, paper, notes }
}

#[test]
fn scan_trade_and_retire_through_the_host() {
    let Setup { host, paper, notes } = setup();
    let engine = Arc::clone(host.engine());
    let scanner = host.scanner(scanner_config(&[SYMBOL]));

    let summary = host.run_scan_cycle(&scanner);
    assert_eq!(summary.created, vec![SYMBOL.to_string()]);
    assert!(paper.is_subscribed(SYMBOL));

    for close in (10..=20).rev().chain([11]) {
        push(&paper, &engine, close);
    }
    assert!(!host.positions().has_position(SYMBOL));

    // Cross up: market buy fills on the paper exchange, the fill reaches the book
    push(&paper, &engine, 12);
    let position = host.positions().position(SYMBOL).unwrap();
    assert_eq!(position.quantity, dec!(5));
    assert_eq!(position.average_price, dec!(12));
    assert!(paper.open_orders().is_empty());

    // Dropped from the scan while holding: kept, inactive, still fed
    let summary = host.process_scan_results(&[]);
    assert_eq!(summary.deactivated, vec![SYMBOL.to_string()]);
    assert_eq!(host.manager().is_strategy_active(SYMBOL), Some(false));
    assert_eq!(host.status().active_strategies, 0);
    assert_eq!(host.status().total_strategies, 1);

    // Overbought exit closes the position
    push(&paper, &engine, 13);
    assert!(!host.positions().has_position(SYMBOL));

    // Still routed until the next cycle, but a re-cross opens nothing
    for close in [12, 11, 10, 9, 8, 9, 10, 11, 12] {
        push(&paper, &engine, close);
        assert!(!host.positions().has_position(SYMBOL), "re-entered at close {close}");
    }
    assert!(paper.open_orders().is_empty());

    let summary = host.process_scan_results(&[]);
    assert_eq!(summary.removed, vec![SYMBOL.to_string()]);
    assert!(!host.manager().has_strategy_instance(SYMBOL));
    assert!(!paper.is_subscribed(SYMBOL));

    settle(&engine);
    {
        let notes = notes.lock();
        assert_eq!(notes.iter().filter(|(_, m)| m.starts_with("BUY 5 US.AMD")).count(), 1);
        assert!(notes.iter().any(|(_, m)| m.starts_with("SELL 5 US.AMD")));
    }

    host.stop();
}

#[test]
fn scan_routes_symbols_to_their_exchange() {
    let mut routing = RoutingConfig::default();
    routing.prefixes = HashMap::from([("HK.".to_string(), "futu".to_string())]);

    let builder = TradingHost::builder(EngineConfig::default())
        .routing(routing)
        .factory(MomentumStrategy::factory(momentum()));
    let paper = Arc::new(PaperExchange::named("paper", builder.engine()));
    let futu = Arc::new(PaperExchange::named("futu", builder.engine()));
    let host = builder
        .exchange(paper.clone())
        .exchange(futu.clone())
        .build()
        .unwrap();
    host.start().unwrap();

    paper.set_price("US.AAPL", dec!(100));
    paper.set_price("US.AAPL", dec!(102));
    futu.set_price("HK.00700", dec!(300));
    futu.set_price("HK.00700", dec!(315));

    let scanner = host.scanner(scanner_config(&["US.AAPL", "HK.00700"]));
    let results = scanner.scan();
    assert_eq!(results[0].symbol, "HK.00700");
    assert_eq!(results[0].exchange.as_deref(), Some("futu"));
    assert_eq!(results[1].exchange.as_deref(), Some("paper"));

    host.process_scan_results(&results);
    let info = host.manager().instance_info("HK.00700").unwrap();
    assert_eq!(info.exchange_name, "futu");
    assert_eq!(info.strategy_name, "momentum");
    assert!(futu.is_subscribed("HK.00700"));
    assert!(!paper.is_subscribed("HK.00700"));

    host.stop();
    assert!(!host.status().running);
}

#[test]
fn stop_drains_and_disconnects() {
    let Setup { host, paper, .. } = setup();
    host.run_scan_cycle(&host.scanner(scanner_config(&[SYMBOL])));
    for close in 0..50 {
        paper.push_kline(KlineData::flat(SYMBOL, "1m", Decimal::from(20 + close % 3)));
    }

    host.stop();

    let status = host.status();
    assert_eq!(status.queued_events, 0);
    assert!(!status.running);
    assert!(!paper.is_connected());
    assert!(host.manager().instances().iter().all(|i| !i.is_running));
}
