//! Strategy engine: per-symbol strategy instances driven by scan results and
//! bus market data.
//!
//! [`StrategyManager`] reconciles the set of live [`Strategy`] instances with
//! each scan cycle and routes kline, tick and trade-deal events to the
//! instance that owns the symbol. Strategies are built through a
//! [`StrategyFactory`] from a [`StrategyContext`] carrying the routed exchange,
//! the position book and a bus logger.

pub mod config;
pub mod indicators;
pub mod manager;
pub mod strategies;
pub mod traits;

pub use config::StrategyManagerConfig;
pub use manager::{ReconcileSummary, RemovalOutcome, StrategyInstanceInfo, StrategyManager};
pub use strategies::{MomentumConfig, MomentumStrategy};
pub use traits::{
    BoxedStrategy, Strategy, StrategyContext, StrategyError, StrategyFactory, StrategyResult,
};
