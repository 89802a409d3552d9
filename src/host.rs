//! Trading host
//!
//! Owns the event bus, the position book, the exchange registry and the
//! strategy manager, and wires them together. Handlers are registered in a
//! fixed order so that, for each `trade-deal` event, the position book is
//! updated before any strategy sees the fill:
//!
//! 1. bus log sink (`log`, `error`)
//! 2. position book (`trade-deal`)
//! 3. strategy manager (`kline`, `tick`, `trade-deal`)
//! 4. extra handlers added through the builder

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use event_bus::{
    BoxedHandler, Engine, EngineConfig, EventBusError, EventType, HandlerId, LogPublisher,
    TracingLogSink,
};
use exchange_connectors::{ExchangeAdapter, ExchangeRegistry, PaperExchange, RoutingConfig};
use parking_lot::Mutex;
use scan_trader_core::{PositionBook, ScanResult};
use strategy_engine::{
    MomentumStrategy, ReconcileSummary, StrategyFactory, StrategyManager, StrategyManagerConfig,
};
use tracing::{info, warn};

use crate::config::{AppConfig, ScannerConfig};
use crate::scanner::WatchlistScanner;

/// Point-in-time host counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    /// Dispatch worker is running
    pub running: bool,
    /// Events waiting for dispatch
    pub queued_events: usize,
    /// Events dispatched since creation
    pub processed_events: u64,
    /// Strategy records still covered by the scan
    pub active_strategies: usize,
    /// All strategy records, active or not
    pub total_strategies: usize,
    /// Symbols with an open position
    pub open_positions: usize,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running={} queued={} processed={} strategies={}/{} positions={}",
            self.running,
            self.queued_events,
            self.processed_events,
            self.active_strategies,
            self.total_strategies,
            self.open_positions
        )
    }
}

/// Builder for [`TradingHost`].
///
/// The engine is created up front so adapters that publish onto the bus can
/// be constructed against [`TradingHostBuilder::engine`] before `build`.
pub struct TradingHostBuilder {
    engine: Arc<Engine>,
    strategy: StrategyManagerConfig,
    routing: RoutingConfig,
    adapters: Vec<Arc<dyn ExchangeAdapter>>,
    positions: Option<Arc<PositionBook>>,
    factory: Option<Arc<dyn StrategyFactory>>,
    handlers: Vec<(EventType, BoxedHandler)>,
}

impl fmt::Debug for TradingHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingHostBuilder")
            .field("strategy", &self.strategy)
            .field("routing", &self.routing)
            .field("adapters", &self.adapters.len())
            .field("has_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

impl TradingHostBuilder {
    /// Starts a builder with a fresh engine
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine: Arc::new(Engine::new(engine)),
            strategy: StrategyManagerConfig::default(),
            routing: RoutingConfig::default(),
            adapters: Vec::new(),
            positions: None,
            factory: None,
            handlers: Vec::new(),
        }
    }

    /// The engine the host will own
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    /// Set strategy lifecycle settings
    pub fn strategy_config(mut self, config: StrategyManagerConfig) -> Self {
        self.strategy = config;
        self
    }

    /// Set symbol routing
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Add an exchange adapter
    pub fn exchange(mut self, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Share an existing position book instead of creating one
    pub fn positions(mut self, positions: Arc<PositionBook>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Set the factory used for new strategy instances
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: StrategyFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Register an extra bus handler after the core wiring
    pub fn handler(mut self, event_type: EventType, handler: BoxedHandler) -> Self {
        self.handlers.push((event_type, handler));
        self
    }

    /// Wires everything together. The engine is not started.
    pub fn build(self) -> Result<TradingHost> {
        let factory = self
            .factory
            .ok_or_else(|| anyhow!("a strategy factory is required"))?;
        if self.adapters.is_empty() {
            bail!("at least one exchange adapter is required");
        }

        let mut exchanges = ExchangeRegistry::new(self.routing);
        for adapter in self.adapters {
            exchanges.register(adapter);
        }
        let positions = self.positions.unwrap_or_default();
        let engine = self.engine;

        let mut handler_ids: Vec<(EventType, HandlerId)> = Vec::new();
        let [log_id, error_id] = TracingLogSink::install(&engine);
        handler_ids.push((EventType::Log, log_id));
        handler_ids.push((EventType::Error, error_id));

        let book = Arc::clone(&positions);
        let position_id = engine.register_fn(EventType::TradeDeal, move |event| {
            let trade = event
                .as_trade()
                .ok_or_else(|| EventBusError::payload_mismatch(event, "trade"))?;
            book.handle_trade(trade)
                .map_err(|err| EventBusError::Upstream(err.to_string()))
        });
        handler_ids.push((EventType::TradeDeal, position_id));

        let manager = Arc::new(StrategyManager::new(
            self.strategy,
            Arc::clone(&engine),
            exchanges.clone(),
            positions.clone(),
            factory,
        ));
        manager.initialize_event_handlers(&engine);

        for (event_type, handler) in self.handlers {
            handler_ids.push((event_type, engine.register_shared(event_type, handler)));
        }

        info!(
            exchanges = ?exchanges.names(),
            default_exchange = %exchanges.routing().default_exchange,
            "trading host assembled"
        );

        Ok(TradingHost {
            logger: LogPublisher::new(Arc::clone(&engine), "host"),
            engine,
            positions,
            exchanges,
            manager,
            handler_ids: Mutex::new(handler_ids),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Running composition of bus, exchanges, positions and strategies
pub struct TradingHost {
    engine: Arc<Engine>,
    positions: Arc<PositionBook>,
    exchanges: ExchangeRegistry,
    manager: Arc<StrategyManager>,
    logger: LogPublisher,
    handler_ids: Mutex<Vec<(EventType, HandlerId)>>,
    stopped: AtomicBool,
}

impl fmt::Debug for TradingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingHost")
            .field("exchanges", &self.exchanges)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TradingHost {
    /// Create a new builder
    pub fn builder(engine: EngineConfig) -> TradingHostBuilder {
        TradingHostBuilder::new(engine)
    }

    /// Builds a host with one paper exchange per configured exchange and
    /// momentum strategies for every scanned symbol
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config
            .momentum
            .validate()
            .context("invalid momentum configuration")?;

        let mut builder = Self::builder(config.engine.clone())
            .strategy_config(config.strategy.clone())
            .routing(config.routing.clone())
            .factory(MomentumStrategy::factory(config.momentum.clone()));
        let engine = builder.engine();
        for exchange in &config.exchanges {
            info!(exchange = %exchange.name, "registering paper exchange");
            builder = builder.exchange(Arc::new(PaperExchange::new(exchange.clone(), Arc::clone(&engine))));
        }
        builder.build()
    }

    /// Connects exchanges and starts dispatch. Exchanges that fail to
    /// connect are logged and left disconnected.
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            bail!("trading host has been stopped and cannot be restarted");
        }
        for (name, err) in self.exchanges.connect_all() {
            warn!(exchange = %name, error = %err, "exchange failed to connect");
        }
        self.engine.start().context("failed to start event engine")?;
        let started = self.manager.start_all_strategies();
        self.logger
            .info(format!("host started with {} exchanges", self.exchanges.len()));
        info!(restarted_strategies = started, "trading host started");
        Ok(())
    }

    /// Stops strategies, drains the bus, detaches handlers and disconnects
    /// exchanges. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let stopped = self.manager.stop_all_strategies();
        self.engine.stop();

        self.manager.detach_event_handlers(&self.engine);
        for (event_type, id) in self.handler_ids.lock().drain(..) {
            self.engine.unregister_handler(event_type, id);
        }
        self.exchanges.disconnect_all();
        info!(stopped_strategies = stopped, status = %self.status(), "trading host stopped");
    }

    /// Reconciles strategy instances against a scan
    pub fn process_scan_results(&self, results: &[ScanResult]) -> ReconcileSummary {
        self.manager.process_scan_results(results)
    }

    /// Scanner over this host's exchanges
    pub fn scanner(&self, config: ScannerConfig) -> WatchlistScanner {
        WatchlistScanner::new(config, self.exchanges.clone())
    }

    /// One scan cycle: scan, reconcile, then push fresh snapshots to every
    /// instance
    pub fn run_scan_cycle(&self, scanner: &WatchlistScanner) -> ReconcileSummary {
        let results = scanner.scan();
        let summary = self.manager.process_scan_results(&results);
        let delivered = self.manager.refresh_snapshots();
        info!(
            candidates = results.len(),
            created = summary.created.len(),
            deactivated = summary.deactivated.len(),
            removed = summary.removed.len(),
            snapshots = delivered,
            "scan cycle complete"
        );
        summary
    }

    /// Current counters
    pub fn status(&self) -> HostStatus {
        HostStatus {
            running: self.engine.is_running(),
            queued_events: self.engine.event_queue_size(),
            processed_events: self.engine.processed_event_count(),
            active_strategies: self.manager.active_strategy_count(),
            total_strategies: self.manager.strategy_count(),
            open_positions: self.positions.len(),
        }
    }

    /// Event bus
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Strategy lifecycle manager
    pub fn manager(&self) -> &Arc<StrategyManager> {
        &self.manager
    }

    /// Position book fed by `trade-deal` events
    pub fn positions(&self) -> &Arc<PositionBook> {
        &self.positions
    }

    /// Registered exchanges
    pub fn exchanges(&self) -> &ExchangeRegistry {
        &self.exchanges
    }
}

impl Drop for TradingHost {
    fn drop(&mut self) {
        self.stop();
    }
}
