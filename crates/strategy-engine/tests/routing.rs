//! Bus-driven routing from a running engine into strategy instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use event_bus::{Engine, Event, EventPayload, EventType};
use exchange_connectors::{ExchangeAdapter, ExchangeRegistry, PaperExchange, RoutingConfig};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scan_trader_core::{
    KlineData, OrderSide, PositionBook, PositionManager, ScanResult, Snapshot, TickData, TradeData,
};
use strategy_engine::{
    BoxedStrategy, Strategy, StrategyContext, StrategyManager, StrategyManagerConfig,
    StrategyResult,
};

#[derive(Default)]
struct Calls {
    klines: AtomicUsize,
    ticks: AtomicUsize,
    trades: AtomicUsize,
}

struct CountingStrategy {
    calls: Arc<Calls>,
    running: bool,
}

impl Strategy for CountingStrategy {
    fn name(&self) -> &str {
        "counting"
    }

    fn start(&mut self) -> StrategyResult<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn on_scan_result(&mut self, _result: &ScanResult) -> StrategyResult<()> {
        Ok(())
    }

    fn on_kline(&mut self, _symbol: &str, _kline: &KlineData) -> StrategyResult<()> {
        self.calls.klines.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_tick(&mut self, _symbol: &str, _tick: &TickData) -> StrategyResult<()> {
        self.calls.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_snapshot(&mut self, _snapshot: &Snapshot) -> StrategyResult<()> {
        Ok(())
    }

    fn on_trade(&mut self, _trade: &TradeData) -> StrategyResult<()> {
        self.calls.trades.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    engine: Arc<Engine>,
    positions: Arc<PositionBook>,
    manager: Arc<StrategyManager>,
    calls: Arc<Mutex<HashMap<String, Arc<Calls>>>>,
}

impl Harness {
    fn start(config: StrategyManagerConfig) -> Self {
        let engine = Arc::new(Engine::default());
        let positions = Arc::new(PositionBook::new());
        let paper = Arc::new(PaperExchange::named("paper", Arc::clone(&engine)));
        paper.connect().unwrap();
        let mut exchanges = ExchangeRegistry::new(RoutingConfig::default());
        exchanges.register(paper);

        let calls: Arc<Mutex<HashMap<String, Arc<Calls>>>> = Arc::default();
        let registry = Arc::clone(&calls);
        let factory = move |ctx: StrategyContext, _result: &ScanResult| -> StrategyResult<BoxedStrategy> {
            let calls = Arc::new(Calls::default());
            registry.lock().insert(ctx.symbol.clone(), Arc::clone(&calls));
            Ok(Box::new(CountingStrategy {
                calls,
                running: false,
            }))
        };

        let manager = Arc::new(StrategyManager::new(
            config,
            Arc::clone(&engine),
            exchanges,
            positions.clone(),
            Arc::new(factory),
        ));
        manager.initialize_event_handlers(&engine);
        engine.start().unwrap();

        Self {
            engine,
            positions,
            manager,
            calls,
        }
    }

    fn calls(&self, symbol: &str) -> Arc<Calls> {
        Arc::clone(&self.calls.lock()[symbol])
    }

    /// Publishes and waits until the bus has dispatched everything queued
    fn publish_and_settle(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.engine.publish(event);
        }
        settle(&self.engine);
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

fn scan(symbol: &str) -> ScanResult {
    ScanResult::new(symbol, 1, dec!(10))
}

fn kline(symbol: &str) -> Event {
    Event::kline(KlineData::flat(symbol, "1m", dec!(10)))
}

fn fill(symbol: &str) -> Event {
    Event::trade_deal(TradeData {
        trade_id: "t-1".into(),
        order_id: None,
        symbol: symbol.into(),
        side: OrderSide::Buy,
        quantity: Decimal::ONE,
        price: dec!(10),
        timestamp: chrono::Utc::now(),
    })
}

#[test]
fn kline_reaches_only_the_owning_instance() {
    let h = Harness::start(StrategyManagerConfig::default());
    h.manager.process_scan_results(&[scan("CCC"), scan("DDD")]);

    h.publish_and_settle([kline("CCC")]);

    assert_eq!(h.calls("CCC").klines.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls("DDD").klines.load(Ordering::SeqCst), 0);
    h.engine.stop();
}

#[test]
fn all_three_event_types_are_routed() {
    let h = Harness::start(StrategyManagerConfig::default());
    h.manager.process_scan_results(&[scan("AAA")]);

    h.publish_and_settle([
        kline("AAA"),
        Event::tick(TickData::new("AAA", dec!(10), Decimal::ONE)),
        fill("AAA"),
        kline("ZZZ"),
    ]);

    let calls = h.calls("AAA");
    assert_eq!(calls.klines.load(Ordering::SeqCst), 1);
    assert_eq!(calls.ticks.load(Ordering::SeqCst), 1);
    assert_eq!(calls.trades.load(Ordering::SeqCst), 1);
    h.engine.stop();
}

#[test]
fn inactive_instances_keep_receiving_data_by_default() {
    let h = Harness::start(StrategyManagerConfig::default());
    h.manager.process_scan_results(&[scan("AAA")]);
    h.positions.update_position("AAA", dec!(10), dec!(10)).unwrap();
    h.manager.process_scan_results(&[]);
    assert_eq!(h.manager.is_strategy_active("AAA"), Some(false));

    h.publish_and_settle([kline("AAA"), fill("AAA")]);

    let calls = h.calls("AAA");
    assert_eq!(calls.klines.load(Ordering::SeqCst), 1);
    assert_eq!(calls.trades.load(Ordering::SeqCst), 1);
    h.engine.stop();
}

#[test]
fn inactive_instances_can_be_muted() {
    let h = Harness::start(StrategyManagerConfig {
        route_to_inactive: false,
        ..StrategyManagerConfig::default()
    });
    h.manager.process_scan_results(&[scan("AAA")]);
    h.positions.update_position("AAA", dec!(10), dec!(10)).unwrap();
    h.manager.process_scan_results(&[]);

    h.publish_and_settle([
        kline("AAA"),
        Event::tick(TickData::new("AAA", dec!(10), Decimal::ONE)),
        fill("AAA"),
    ]);

    let calls = h.calls("AAA");
    assert_eq!(calls.klines.load(Ordering::SeqCst), 0);
    assert_eq!(calls.ticks.load(Ordering::SeqCst), 0);
    assert_eq!(calls.trades.load(Ordering::SeqCst), 0);
    h.engine.stop();
}

#[test]
fn malformed_event_is_dropped_without_stopping_other_handlers() {
    let h = Harness::start(StrategyManagerConfig::default());
    h.manager.process_scan_results(&[scan("AAA")]);
    let observed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&observed);
    h.engine.register_fn(EventType::Kline, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let wrong_shape = Event::new(
        EventType::Kline,
        EventPayload::Tick(TickData::new("AAA", dec!(10), Decimal::ONE)),
    );
    h.publish_and_settle([wrong_shape, kline("AAA")]);

    assert_eq!(observed.load(Ordering::SeqCst), 2);
    assert_eq!(h.calls("AAA").klines.load(Ordering::SeqCst), 1);
    assert!(h.engine.is_running());
    h.engine.stop();
}

#[test]
fn dropped_manager_leaves_handlers_inert() {
    let h = Harness::start(StrategyManagerConfig::default());
    h.manager.process_scan_results(&[scan("AAA")]);
    let calls = h.calls("AAA");
    let Harness { engine, manager, .. } = h;
    drop(manager);

    engine.publish(kline("AAA"));
    settle(&engine);

    assert_eq!(calls.klines.load(Ordering::SeqCst), 0);
    assert_eq!(engine.handler_count(EventType::Kline), 1);
    engine.stop();
}

#[test]
fn scans_and_dispatch_interleave_safely() {
    let h = Harness::start(StrategyManagerConfig::default());
    let symbols: Vec<String> = (0..8).map(|i| format!("S{i}")).collect();

    let producer = {
        let engine = Arc::clone(&h.engine);
        let symbols = symbols.clone();
        thread::spawn(move || {
            for round in 0..200 {
                engine.publish(kline(&symbols[round % symbols.len()]));
            }
        })
    };

    for round in 0..50 {
        let covered: Vec<ScanResult> = symbols
            .iter()
            .enumerate()
            .filter(|(i, _)| (i + round) % 3 != 0)
            .map(|(_, s)| scan(s))
            .collect();
        h.manager.process_scan_results(&covered);
    }
    producer.join().unwrap();
    settle(&h.engine);

    let last: Vec<ScanResult> = symbols.iter().map(|s| scan(s)).collect();
    h.manager.process_scan_results(&last);
    assert_eq!(h.manager.strategy_count(), symbols.len());
    assert_eq!(h.manager.strategy_symbols(), symbols);
    h.engine.stop();
}
