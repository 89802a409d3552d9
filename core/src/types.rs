//! Core market data and trading types shared by the event bus, the exchange
//! adapters and the strategy layer.
//!
//! Prices and quantities are carried as [`Decimal`] everywhere; timestamps
//! are UTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument key, e.g. "HK.00700", "US.AAPL", "BTCUSDT"
pub type Symbol = String;

/// Broker-assigned order identifier
pub type OrderId = String;

/// Account identifier
pub type AccountId = String;

/// Buy or sell side of an order or fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Applies the side's sign to an unsigned quantity (buy positive, sell negative)
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            OrderSide::Buy => quantity.abs(),
            OrderSide::Sell => -quantity.abs(),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Supported order types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at best available price
    Market,

    /// Execute only at specified price or better
    Limit,
}

impl OrderType {
    /// Returns true if the order type needs a price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit)
    }
}

/// Current status of an order at the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order created locally, not yet acknowledged
    Pending,

    /// Order accepted by the broker and working
    Submitted,

    /// Order partially filled
    PartiallyFilled,

    /// Order completely filled
    Filled,

    /// Order cancelled
    Cancelled,

    /// Order rejected by the broker
    Rejected,
}

impl OrderStatus {
    /// Checks if the order can still be filled or cancelled
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }

    /// Checks if the order reached a terminal state
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Last-trade tick with top of book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickData {
    pub symbol: Symbol,
    pub price: Decimal,
    pub volume: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl TickData {
    /// Tick with bid and ask collapsed onto the trade price
    pub fn new(symbol: impl Into<Symbol>, price: Decimal, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            bid: price,
            ask: price,
            timestamp: Utc::now(),
        }
    }
}

/// OHLCV bar for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineData {
    pub symbol: Symbol,
    /// Bar interval, e.g. "1m", "5m", "1d"
    pub interval: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl KlineData {
    /// Flat bar where open, high, low and close are all `close`
    pub fn flat(symbol: impl Into<Symbol>, interval: impl Into<String>, close: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }
}

/// Order book depth, best levels first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthData {
    pub symbol: Symbol,
    /// (price, size) pairs, best bid first
    pub bids: Vec<(Decimal, Decimal)>,
    /// (price, size) pairs, best ask first
    pub asks: Vec<(Decimal, Decimal)>,
    pub timestamp: DateTime<Utc>,
}

/// A trade print: a public market trade or one of our own fills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub trade_id: String,
    /// Set for own fills, empty for public prints
    pub order_id: Option<OrderId>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl TradeData {
    /// Position delta of this fill (buy positive, sell negative)
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signed(self.quantity)
    }
}

/// Order state as reported by a broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderData {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// Net holding in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    pub symbol: Symbol,
    /// Positive for long, negative for short
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PositionData {
    /// Checks if the position is flat
    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Unrealized P&L at the given mark
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        (mark - self.average_price) * self.quantity
    }
}

/// Account funds snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub account_id: AccountId,
    pub cash: Decimal,
    pub equity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Severity of a log or notification record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Log record travelling over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub level: LogLevel,
    pub message: String,
    /// Component that emitted the record
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl LogData {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trading signal emitted by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    pub symbol: Symbol,
    pub side: OrderSide,
    /// Confidence in [0, 1]
    pub strength: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// One ranked candidate from a market scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: Symbol,
    /// 1-based rank within the scan
    pub rank: u32,
    pub last_price: Decimal,
    /// Change versus previous close, in percent
    pub change_pct: Decimal,
    pub volume: Decimal,
    /// Scanner-specific score, higher is better
    pub score: f64,
    /// Broker this candidate should trade through, if the scanner knows
    #[serde(default)]
    pub exchange: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    pub fn new(symbol: impl Into<Symbol>, rank: u32, last_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            rank,
            last_price,
            change_pct: Decimal::ZERO,
            volume: Decimal::ZERO,
            score: 0.0,
            exchange: None,
            timestamp: Utc::now(),
        }
    }

    /// Pins the candidate to a named exchange
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }
}

/// Point-in-time quote snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub prev_close: Decimal,
    pub volume: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Percent change of the last price versus the previous close
    pub fn change_pct(&self) -> Decimal {
        if self.prev_close.is_zero() {
            return Decimal::ZERO;
        }
        (self.last_price - self.prev_close) / self.prev_close * Decimal::ONE_HUNDRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_signing() {
        assert_eq!(OrderSide::Buy.signed(dec!(10)), dec!(10));
        assert_eq!(OrderSide::Sell.signed(dec!(10)), dec!(-10));
        assert_eq!(OrderSide::Sell.signed(dec!(-10)), dec!(-10));
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }

    #[test]
    fn test_order_status_states() {
        assert!(OrderStatus::Submitted.is_active());
        assert!(!OrderStatus::Submitted.is_completed());
        assert!(OrderStatus::Filled.is_completed());
        assert!(!OrderStatus::Rejected.is_active());
    }

    #[test]
    fn test_snapshot_change_pct() {
        let mut snapshot = Snapshot {
            symbol: "US.AAPL".to_string(),
            last_price: dec!(110),
            open: dec!(100),
            high: dec!(111),
            low: dec!(99),
            prev_close: dec!(100),
            volume: dec!(1000),
            bid: dec!(109.9),
            ask: dec!(110.1),
            timestamp: Utc::now(),
        };
        assert_eq!(snapshot.change_pct(), dec!(10));

        snapshot.prev_close = Decimal::ZERO;
        assert_eq!(snapshot.change_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Info > LogLevel::Debug);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }
}
