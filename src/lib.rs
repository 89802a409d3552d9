//! # Scan Trader
//!
//! Event-driven trading host. A periodic market scan decides which symbols
//! deserve a strategy; the strategy manager creates, feeds and retires one
//! strategy instance per symbol while an in-process event bus carries market
//! data, fills and log records between exchange adapters and consumers.
//!
//! ## Architecture
//!
//! The system is organized into modular crates:
//! - `scan-trader-core`: market data types, orders, the position book
//! - `event-bus`: single-worker FIFO dispatch engine and log sinks
//! - `exchange-connectors`: exchange adapter contract, routing, paper broker
//! - `strategy-engine`: strategy lifecycle manager, indicators, momentum strategy
//!
//! This crate wires them into a [`TradingHost`](host::TradingHost) and ships
//! the command line binary.
//!
//! ## Quick Start
//!
//! ```no_run
//! use scan_trader::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(DEFAULT_CONFIG_PATH)?;
//!     let host = TradingHost::from_config(&config)?;
//!     host.start()?;
//!
//!     let scanner = host.scanner(config.scanner.clone());
//!     host.run_scan_cycle(&scanner);
//!     println!("{}", host.status());
//!
//!     host.stop();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_qualifications,
    missing_debug_implementations
)]

pub mod config;
pub mod host;
pub mod scanner;

/// Common imports for host users
pub mod prelude {
    pub use crate::config::{AppConfig, LoggingConfig, ScannerConfig, DEFAULT_CONFIG_PATH};
    pub use crate::host::{HostStatus, TradingHost, TradingHostBuilder};
    pub use crate::scanner::WatchlistScanner;

    pub use event_bus::{Engine, EngineConfig, Event, EventType};
    pub use exchange_connectors::{ExchangeAdapter, ExchangeRegistry, PaperExchange, RoutingConfig};
    pub use scan_trader_core::{PositionBook, PositionManager, ScanResult};
    pub use strategy_engine::{MomentumConfig, MomentumStrategy, StrategyManager, StrategyManagerConfig};
}
