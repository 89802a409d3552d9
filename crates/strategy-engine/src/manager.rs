//! Strategy lifecycle manager.
//!
//! Holds at most one strategy instance per symbol and reconciles that set
//! against every scan cycle:
//!
//! ```text
//! [absent]   --scan match-------------------------> [active]
//! [active]   --dropped from scan, flat------------> [absent]
//! [active]   --dropped from scan, position open---> [inactive]
//! [inactive] --dropped again once flat, or forced-> [absent]
//! [inactive] --back in scan-----------------------> [inactive] (scan forwarded)
//! ```
//!
//! The record map sits behind one mutex that a whole reconciliation holds, so
//! scan cycles never interleave. Each strategy sits behind its own mutex;
//! bus routing resolves the target under the map lock, releases it, then
//! locks only the strategy. Lock order is always map before strategy.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use event_bus::{Engine, Event, EventBusError, EventType, HandlerId, HandlerResult, LogPublisher, SharedEvent};
use exchange_connectors::{ExchangeAdapter, ExchangeRegistry};
use metrics::gauge;
use parking_lot::Mutex;
use scan_trader_core::{PositionManager, ScanResult, Snapshot, Symbol};
use tracing::{debug, error, info, warn};

use crate::config::StrategyManagerConfig;
use crate::traits::{BoxedStrategy, StrategyContext, StrategyFactory, StrategyResult};

type SharedStrategy = Arc<Mutex<BoxedStrategy>>;

struct StrategyRecord {
    strategy: SharedStrategy,
    is_active: bool,
    exchange_name: String,
    exchange: Arc<dyn ExchangeAdapter>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct ManagerState {
    records: HashMap<Symbol, StrategyRecord>,
    last_scan: HashSet<Symbol>,
}

impl ManagerState {
    fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active).count()
    }
}

/// Result of [`StrategyManager::remove_strategy_instance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// No instance for the symbol
    NotFound,
    /// Open position vetoed deletion; the instance is kept inactive
    Deactivated,
    /// Strategy stopped and record deleted
    Removed,
}

/// What one scan cycle changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: Vec<Symbol>,
    pub refreshed: Vec<Symbol>,
    pub deactivated: Vec<Symbol>,
    pub removed: Vec<Symbol>,
}

/// Point-in-time view of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyInstanceInfo {
    pub symbol: Symbol,
    pub strategy_name: String,
    pub exchange_name: String,
    pub is_active: bool,
    pub is_running: bool,
    pub created_at: DateTime<Utc>,
}

/// Creates, routes to and retires per-symbol strategy instances.
///
/// Share as `Arc<StrategyManager>`; bus handlers hold a weak reference so
/// dropping the last strong handle releases every instance.
pub struct StrategyManager {
    config: StrategyManagerConfig,
    engine: Arc<Engine>,
    exchanges: ExchangeRegistry,
    positions: Arc<dyn PositionManager>,
    factory: Arc<dyn StrategyFactory>,
    logger: LogPublisher,
    state: Mutex<ManagerState>,
    handler_ids: Mutex<Vec<(EventType, HandlerId)>>,
}

impl fmt::Debug for StrategyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyManager")
            .field("config", &self.config)
            .field("exchanges", &self.exchanges)
            .field("instances", &self.strategy_count())
            .finish_non_exhaustive()
    }
}

impl StrategyManager {
    pub fn new(
        config: StrategyManagerConfig,
        engine: Arc<Engine>,
        exchanges: ExchangeRegistry,
        positions: Arc<dyn PositionManager>,
        factory: Arc<dyn StrategyFactory>,
    ) -> Self {
        let logger = LogPublisher::new(Arc::clone(&engine), "strategy_manager");
        Self {
            config,
            engine,
            exchanges,
            positions,
            factory,
            logger,
            state: Mutex::new(ManagerState::default()),
            handler_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &StrategyManagerConfig {
        &self.config
    }

    /// Subscribes the manager to kline, tick and trade-deal events. A second
    /// call keeps the existing registration.
    pub fn initialize_event_handlers(self: &Arc<Self>, engine: &Engine) {
        let mut handler_ids = self.handler_ids.lock();
        if !handler_ids.is_empty() {
            warn!("strategy manager event handlers already initialized");
            return;
        }

        let weak = Arc::downgrade(self);
        let kline = engine.register_fn(EventType::Kline, route_with(&weak, Self::on_kline_event));
        let tick = engine.register_fn(EventType::Tick, route_with(&weak, Self::on_tick_event));
        let trade = engine.register_fn(EventType::TradeDeal, route_with(&weak, Self::on_trade_event));

        handler_ids.extend([
            (EventType::Kline, kline),
            (EventType::Tick, tick),
            (EventType::TradeDeal, trade),
        ]);
        info!("strategy manager event handlers initialized");
    }

    /// Removes the handlers added by [`Self::initialize_event_handlers`]
    pub fn detach_event_handlers(&self, engine: &Engine) {
        for (event_type, id) in self.handler_ids.lock().drain(..) {
            engine.unregister_handler(event_type, id);
        }
    }

    /// Reconciles live instances with a new scan.
    ///
    /// New symbols get an instance, symbols already covered get the fresh
    /// result, and symbols no longer present are removed unless an open
    /// position vetoes it.
    pub fn process_scan_results(&self, results: &[ScanResult]) -> ReconcileSummary {
        let mut state = self.state.lock();
        let mut summary = ReconcileSummary::default();

        let current: HashSet<Symbol> = results.iter().map(|r| r.symbol.clone()).collect();

        for result in results {
            let existing = state.records.get(&result.symbol).map(|r| Arc::clone(&r.strategy));
            match existing {
                Some(target) => {
                    let mut strategy = target.lock();
                    if strategy.is_running() {
                        if let Err(err) = strategy.on_scan_result(result) {
                            warn!(symbol = %result.symbol, error = %err, "strategy rejected scan result");
                        }
                    }
                    summary.refreshed.push(result.symbol.clone());
                }
                None => {
                    if self.create_locked(&mut state, &result.symbol, result) {
                        summary.created.push(result.symbol.clone());
                    }
                }
            }
        }

        let mut stale: Vec<Symbol> = state
            .records
            .keys()
            .filter(|symbol| !current.contains(*symbol))
            .cloned()
            .collect();
        stale.sort();

        for symbol in stale {
            match self.remove_locked(&mut state, &symbol, false) {
                RemovalOutcome::Deactivated => summary.deactivated.push(symbol),
                RemovalOutcome::Removed => summary.removed.push(symbol),
                RemovalOutcome::NotFound => {}
            }
        }

        state.last_scan = current;
        self.record_gauges(&state);

        info!(
            results = results.len(),
            created = summary.created.len(),
            removed = summary.removed.len(),
            deactivated = summary.deactivated.len(),
            active = state.active_count(),
            "scan results processed"
        );
        summary
    }

    /// Builds, starts and registers an instance for `symbol`. Returns false
    /// when one already exists or creation failed.
    pub fn create_strategy_instance(&self, symbol: &str, result: &ScanResult) -> bool {
        let mut state = self.state.lock();
        let created = self.create_locked(&mut state, symbol, result);
        self.record_gauges(&state);
        created
    }

    /// Deletes the instance for `symbol`. Without `force`, an open position
    /// only deactivates it.
    pub fn remove_strategy_instance(&self, symbol: &str, force: bool) -> RemovalOutcome {
        let mut state = self.state.lock();
        let outcome = self.remove_locked(&mut state, symbol, force);
        self.record_gauges(&state);
        outcome
    }

    fn create_locked(&self, state: &mut ManagerState, symbol: &str, result: &ScanResult) -> bool {
        if state.records.contains_key(symbol) {
            warn!(symbol, "strategy instance already exists");
            return false;
        }
        if let Some(max) = self.config.max_instances {
            if state.records.len() >= max {
                warn!(symbol, max, "strategy instance limit reached");
                return false;
            }
        }

        let (exchange_name, exchange) = match self.exchanges.route(symbol, result.exchange.as_deref()) {
            Ok(route) => route,
            Err(err) => {
                error!(symbol, error = %err, "no exchange for symbol");
                return false;
            }
        };

        let ctx = StrategyContext {
            symbol: symbol.to_string(),
            exchange_name: exchange_name.clone(),
            exchange: Arc::clone(&exchange),
            positions: Arc::clone(&self.positions),
            engine: Arc::clone(&self.engine),
            logger: self.logger.scoped(format!("strategy:{symbol}")),
        };
        let mut strategy = match self.factory.create(ctx, result) {
            Ok(strategy) => strategy,
            Err(err) => {
                error!(symbol, error = %err, "failed to build strategy");
                return false;
            }
        };

        if let Err(err) = strategy.start() {
            error!(symbol, error = %err, "strategy failed to start");
            self.logger.error(format!("strategy for {symbol} failed to start: {err}"));
            return false;
        }

        if self.config.warmup_bars > 0 {
            if let Err(err) = self.warm_up(&mut strategy, symbol, exchange.as_ref()) {
                warn!(symbol, error = %err, "strategy warm-up incomplete");
            }
        }

        if self.config.subscribe_market_data {
            let interval = self.config.kline_interval.as_str();
            if let Err(err) = exchange.subscribe_kline(symbol, interval) {
                warn!(symbol, exchange = %exchange_name, error = %err, "kline subscription failed");
            }
            if let Err(err) = exchange.subscribe_tick(symbol) {
                warn!(symbol, exchange = %exchange_name, error = %err, "tick subscription failed");
            }
        }

        if let Err(err) = strategy.on_scan_result(result) {
            warn!(symbol, error = %err, "strategy rejected initial scan result");
        }

        let strategy_name = strategy.name().to_string();
        state.records.insert(
            symbol.to_string(),
            StrategyRecord {
                strategy: Arc::new(Mutex::new(strategy)),
                is_active: true,
                exchange_name: exchange_name.clone(),
                exchange,
                created_at: Utc::now(),
            },
        );

        self.engine
            .publish(Event::strategy_start(symbol).with_extra("exchange", exchange_name.clone()));
        info!(symbol, strategy = %strategy_name, exchange = %exchange_name, "strategy instance created");
        self.logger.info(format!("created {strategy_name} for {symbol} on {exchange_name}"));
        true
    }

    fn warm_up(
        &self,
        strategy: &mut BoxedStrategy,
        symbol: &str,
        exchange: &dyn ExchangeAdapter,
    ) -> StrategyResult<()> {
        let bars = exchange.get_history_kline(symbol, &self.config.kline_interval, self.config.warmup_bars)?;
        debug!(symbol, bars = bars.len(), "replaying history");
        for bar in &bars {
            strategy.on_kline(symbol, bar)?;
        }
        Ok(())
    }

    fn remove_locked(&self, state: &mut ManagerState, symbol: &str, force: bool) -> RemovalOutcome {
        if !state.records.contains_key(symbol) {
            return RemovalOutcome::NotFound;
        }

        if !force && self.positions.has_position(symbol) {
            if let Some(record) = state.records.get_mut(symbol) {
                if record.is_active {
                    record.is_active = false;
                    record.strategy.lock().on_deactivated();
                    warn!(symbol, "open position blocks strategy removal, instance deactivated");
                    self.logger
                        .warn(format!("{symbol} left the scan with an open position, kept inactive"));
                }
            }
            return RemovalOutcome::Deactivated;
        }

        let Some(record) = state.records.remove(symbol) else {
            return RemovalOutcome::NotFound;
        };
        {
            let mut strategy = record.strategy.lock();
            if strategy.is_running() {
                strategy.stop();
            }
        }
        if self.config.subscribe_market_data {
            if let Err(err) = record.exchange.unsubscribe(symbol) {
                warn!(symbol, exchange = %record.exchange_name, error = %err, "unsubscribe failed");
            }
        }

        self.engine.publish(Event::strategy_stop(symbol));
        info!(symbol, force, "strategy instance removed");
        self.logger.info(format!("removed strategy for {symbol}"));
        RemovalOutcome::Removed
    }

    /// Strategy that should receive routed data for `symbol`, if any
    fn route_target(&self, symbol: &str) -> Option<SharedStrategy> {
        let state = self.state.lock();
        let record = state.records.get(symbol)?;
        if !record.is_active && !self.config.route_to_inactive {
            return None;
        }
        Some(Arc::clone(&record.strategy))
    }

    fn on_kline_event(&self, event: &SharedEvent) -> HandlerResult {
        let kline = event
            .as_kline()
            .ok_or_else(|| EventBusError::payload_mismatch(event, "kline"))?;
        self.deliver(&kline.symbol, |strategy| strategy.on_kline(&kline.symbol, kline))
    }

    fn on_tick_event(&self, event: &SharedEvent) -> HandlerResult {
        let tick = event
            .as_tick()
            .ok_or_else(|| EventBusError::payload_mismatch(event, "tick"))?;
        self.deliver(&tick.symbol, |strategy| strategy.on_tick(&tick.symbol, tick))
    }

    fn on_trade_event(&self, event: &SharedEvent) -> HandlerResult {
        let trade = event
            .as_trade()
            .ok_or_else(|| EventBusError::payload_mismatch(event, "trade"))?;
        self.deliver(&trade.symbol, |strategy| strategy.on_trade(trade))
    }

    fn deliver<F>(&self, symbol: &str, callback: F) -> HandlerResult
    where
        F: FnOnce(&mut BoxedStrategy) -> StrategyResult<()>,
    {
        let Some(target) = self.route_target(symbol) else {
            return Ok(());
        };
        let mut strategy = target.lock();
        if !strategy.is_running() {
            return Ok(());
        }
        callback(&mut *strategy).map_err(|err| EventBusError::Upstream(format!("{symbol}: {err}")))
    }

    /// Delivers snapshots to the instances owning their symbols
    pub fn dispatch_snapshots<'a, I>(&self, snapshots: I) -> usize
    where
        I: IntoIterator<Item = &'a Snapshot>,
    {
        let mut delivered = 0;
        for snapshot in snapshots {
            let Some(target) = self.route_target(&snapshot.symbol) else {
                continue;
            };
            let mut strategy = target.lock();
            if !strategy.is_running() {
                continue;
            }
            match strategy.on_snapshot(snapshot) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(symbol = %snapshot.symbol, error = %err, "snapshot rejected"),
            }
        }
        delivered
    }

    /// Pulls batch snapshots from each instance's exchange and dispatches them
    pub fn refresh_snapshots(&self) -> usize {
        let by_exchange: BTreeMap<String, (Arc<dyn ExchangeAdapter>, Vec<Symbol>)> = {
            let state = self.state.lock();
            let mut grouped: BTreeMap<String, (Arc<dyn ExchangeAdapter>, Vec<Symbol>)> = BTreeMap::new();
            for (symbol, record) in &state.records {
                grouped
                    .entry(record.exchange_name.clone())
                    .or_insert_with(|| (Arc::clone(&record.exchange), Vec::new()))
                    .1
                    .push(symbol.clone());
            }
            grouped
        };

        let mut delivered = 0;
        for (name, (exchange, symbols)) in by_exchange {
            match exchange.get_batch_snapshots(&symbols) {
                Ok(snapshots) => delivered += self.dispatch_snapshots(snapshots.values()),
                Err(err) => warn!(exchange = %name, error = %err, "snapshot refresh failed"),
            }
        }
        delivered
    }

    /// Starts every instance that is not running; returns how many started
    pub fn start_all_strategies(&self) -> usize {
        let state = self.state.lock();
        let mut started = 0;
        for (symbol, record) in &state.records {
            let mut strategy = record.strategy.lock();
            if strategy.is_running() {
                continue;
            }
            match strategy.start() {
                Ok(()) => started += 1,
                Err(err) => error!(symbol = %symbol, error = %err, "strategy failed to start"),
            }
        }
        info!(started, "strategies started");
        started
    }

    /// Stops every running instance; returns how many stopped
    pub fn stop_all_strategies(&self) -> usize {
        let state = self.state.lock();
        let mut stopped = 0;
        for record in state.records.values() {
            let mut strategy = record.strategy.lock();
            if strategy.is_running() {
                strategy.stop();
                stopped += 1;
            }
        }
        info!(stopped, "strategies stopped");
        stopped
    }

    pub fn has_strategy_instance(&self, symbol: &str) -> bool {
        self.state.lock().records.contains_key(symbol)
    }

    /// `Some(is_active)` when an instance exists
    pub fn is_strategy_active(&self, symbol: &str) -> Option<bool> {
        self.state.lock().records.get(symbol).map(|r| r.is_active)
    }

    /// Instances eligible for new trading decisions
    pub fn active_strategy_count(&self) -> usize {
        self.state.lock().active_count()
    }

    /// All instances, active or not
    pub fn strategy_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Symbols with an instance, sorted
    pub fn strategy_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state.lock().records.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Symbols of the most recent scan, sorted
    pub fn last_scan_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.state.lock().last_scan.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn instance_info(&self, symbol: &str) -> Option<StrategyInstanceInfo> {
        let state = self.state.lock();
        state.records.get(symbol).map(|record| describe(symbol, record))
    }

    /// Every instance, sorted by symbol
    pub fn instances(&self) -> Vec<StrategyInstanceInfo> {
        let state = self.state.lock();
        let mut all: Vec<StrategyInstanceInfo> = state
            .records
            .iter()
            .map(|(symbol, record)| describe(symbol, record))
            .collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    fn record_gauges(&self, state: &ManagerState) {
        gauge!("strategy_manager.instances", state.records.len() as f64, "state" => "all");
        gauge!("strategy_manager.instances", state.active_count() as f64, "state" => "active");
    }
}

fn describe(symbol: &str, record: &StrategyRecord) -> StrategyInstanceInfo {
    let strategy = record.strategy.lock();
    StrategyInstanceInfo {
        symbol: symbol.to_string(),
        strategy_name: strategy.name().to_string(),
        exchange_name: record.exchange_name.clone(),
        is_active: record.is_active,
        is_running: strategy.is_running(),
        created_at: record.created_at,
    }
}

/// Bus handler forwarding to a manager method while the manager is alive
fn route_with(
    weak: &Weak<StrategyManager>,
    route: fn(&StrategyManager, &SharedEvent) -> HandlerResult,
) -> impl Fn(&SharedEvent) -> HandlerResult + Send + Sync + 'static {
    let weak = Weak::clone(weak);
    move |event| match weak.upgrade() {
        Some(manager) => route(manager.as_ref(), event),
        None => Ok(()),
    }
}
