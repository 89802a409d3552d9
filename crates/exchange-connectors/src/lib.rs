//! Exchange connectors for Scan Trader
//!
//! Every broker back-end (Futu, IBKR, Binance, the in-process paper broker)
//! implements [`ExchangeAdapter`]. Adapters publish tick, kline, order and
//! trade-deal events onto the bus as data arrives; callers only query them
//! directly for history, snapshots and order entry.

use std::collections::HashMap;

use rust_decimal::Decimal;
use scan_trader_core::{KlineData, OrderId, OrderSide, OrderType, Snapshot, Symbol};
use thiserror::Error;

pub mod paper;
pub mod registry;

pub use paper::{PaperExchange, PaperExchangeConfig};
pub use registry::{ExchangeRegistry, RoutingConfig};

/// Exchange connector error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Symbol not supported: {0}")]
    UnsupportedSymbol(String),

    #[error("No market data for {0}")]
    NoMarketData(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Exchange not registered: {0}")]
    UnknownExchange(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Broker back-end contract.
///
/// Methods take `&self` so one adapter can be shared by the strategies routed
/// to it; implementations use interior mutability. Calls may run on the bus
/// dispatch thread and should return promptly.
pub trait ExchangeAdapter: Send + Sync {
    /// Name used for routing, e.g. "futu", "ibkr", "binance"
    fn name(&self) -> &str;

    fn connect(&self) -> ExchangeResult<()>;

    fn disconnect(&self) -> ExchangeResult<()>;

    fn is_connected(&self) -> bool;

    /// Starts streaming bars of `interval` for the symbol onto the bus
    fn subscribe_kline(&self, symbol: &str, interval: &str) -> ExchangeResult<()>;

    /// Starts streaming ticks for the symbol onto the bus
    fn subscribe_tick(&self, symbol: &str) -> ExchangeResult<()>;

    /// Stops all streams for the symbol
    fn unsubscribe(&self, symbol: &str) -> ExchangeResult<()>;

    /// Most recent `count` bars, oldest first
    fn get_history_kline(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> ExchangeResult<Vec<KlineData>>;

    fn get_snapshot(&self, symbol: &str) -> ExchangeResult<Snapshot>;

    /// Snapshots for every symbol the exchange knows; unknown ones are omitted
    fn get_batch_snapshots(&self, symbols: &[Symbol]) -> ExchangeResult<HashMap<Symbol, Snapshot>>;

    /// Submits an order and returns the broker order id
    fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        order_type: OrderType,
        price: Option<Decimal>,
    ) -> ExchangeResult<OrderId>;

    fn cancel_order(&self, order_id: &str) -> ExchangeResult<()>;
}

/// Shared validation for order entry
pub fn validate_order(
    symbol: &str,
    quantity: Decimal,
    order_type: OrderType,
    price: Option<Decimal>,
) -> ExchangeResult<()> {
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidRequest("empty symbol".into()));
    }
    if quantity <= Decimal::ZERO {
        return Err(ExchangeError::InvalidRequest(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    match (order_type.requires_price(), price) {
        (true, None) => Err(ExchangeError::InvalidRequest(format!(
            "{order_type:?} order for {symbol} requires a price"
        ))),
        (_, Some(p)) if p <= Decimal::ZERO => Err(ExchangeError::InvalidRequest(format!(
            "price must be positive, got {p}"
        ))),
        _ => Ok(()),
    }
}
