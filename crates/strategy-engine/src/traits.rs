//! Strategy contracts.

use std::fmt;
use std::sync::Arc;

use event_bus::{Engine, LogPublisher};
use exchange_connectors::{ExchangeAdapter, ExchangeError};
use scan_trader_core::{
    KlineData, PositionManager, ScanResult, Snapshot, Symbol, TickData, TradeData, TradingError,
};
use thiserror::Error;

/// Strategy errors
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build strategy for {symbol}: {reason}")]
    Factory { symbol: Symbol, reason: String },

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("Strategy error: {0}")]
    Internal(String),
}

pub type StrategyResult<T> = Result<T, StrategyError>;

/// Per-symbol trading logic driven by the lifecycle manager.
///
/// All callbacks run on either the scan caller's thread or the bus dispatch
/// thread, never both at once for the same instance. They should return
/// promptly; a slow callback stalls every other bus consumer.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> StrategyResult<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Fresh scan data for the owned symbol, on creation and on every later
    /// scan cycle that still contains it
    fn on_scan_result(&mut self, result: &ScanResult) -> StrategyResult<()>;

    fn on_kline(&mut self, symbol: &str, kline: &KlineData) -> StrategyResult<()>;

    fn on_tick(&mut self, symbol: &str, tick: &TickData) -> StrategyResult<()>;

    fn on_snapshot(&mut self, snapshot: &Snapshot) -> StrategyResult<()>;

    /// Fill reported for the owned symbol
    fn on_trade(&mut self, _trade: &TradeData) -> StrategyResult<()> {
        Ok(())
    }

    /// The symbol left the scan while a position is still open. The instance
    /// keeps receiving market data so it can exit, but must not open new
    /// positions from here on. Never undone: a later scan that lists the
    /// symbol again does not reactivate the instance.
    fn on_deactivated(&mut self) {}
}

pub type BoxedStrategy = Box<dyn Strategy>;

/// Collaborators handed to a new strategy instance.
#[derive(Clone)]
pub struct StrategyContext {
    pub symbol: Symbol,
    pub exchange_name: String,
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub positions: Arc<dyn PositionManager>,
    pub engine: Arc<Engine>,
    pub logger: LogPublisher,
}

impl fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext")
            .field("symbol", &self.symbol)
            .field("exchange_name", &self.exchange_name)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

/// Builds strategy instances for newly qualified symbols.
pub trait StrategyFactory: Send + Sync {
    fn create(&self, ctx: StrategyContext, result: &ScanResult) -> StrategyResult<BoxedStrategy>;
}

impl<F> StrategyFactory for F
where
    F: Fn(StrategyContext, &ScanResult) -> StrategyResult<BoxedStrategy> + Send + Sync,
{
    fn create(&self, ctx: StrategyContext, result: &ScanResult) -> StrategyResult<BoxedStrategy> {
        self(ctx, result)
    }
}
