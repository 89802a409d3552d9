//! Event envelope carried by the bus.
//!
//! An [`Event`] pairs a closed [`EventType`] tag with exactly one
//! [`EventPayload`] shape. Reading the payload as the wrong shape yields
//! `None`; it never reinterprets data.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scan_trader_core::{
    AccountData, DepthData, KlineData, LogData, OrderData, PositionData, ScanResult, SignalData,
    TickData, TradeData,
};
use serde::{Deserialize, Serialize};

/// Shared handle to an event once it has been handed to the bus.
pub type SharedEvent = Arc<Event>;

/// Closed set of event kinds the bus routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Tick,
    Kline,
    Depth,
    /// Public market trade print
    Trade,
    Order,
    /// Fill of one of our own orders
    TradeDeal,
    Position,
    Account,
    Log,
    Error,
    Timer,
    StrategyStart,
    StrategyStop,
    Signal,
    ScanResult,
}

impl EventType {
    pub const ALL: [EventType; 15] = [
        EventType::Tick,
        EventType::Kline,
        EventType::Depth,
        EventType::Trade,
        EventType::Order,
        EventType::TradeDeal,
        EventType::Position,
        EventType::Account,
        EventType::Log,
        EventType::Error,
        EventType::Timer,
        EventType::StrategyStart,
        EventType::StrategyStop,
        EventType::Signal,
        EventType::ScanResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Tick => "tick",
            EventType::Kline => "kline",
            EventType::Depth => "depth",
            EventType::Trade => "trade",
            EventType::Order => "order",
            EventType::TradeDeal => "trade_deal",
            EventType::Position => "position",
            EventType::Account => "account",
            EventType::Log => "log",
            EventType::Error => "error",
            EventType::Timer => "timer",
            EventType::StrategyStart => "strategy_start",
            EventType::StrategyStop => "strategy_stop",
            EventType::Signal => "signal",
            EventType::ScanResult => "scan_result",
        }
    }

    /// Control events carry no payload; everything else must.
    pub fn requires_payload(&self) -> bool {
        !matches!(
            self,
            EventType::Timer | EventType::StrategyStart | EventType::StrategyStop
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single data shape an event carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Empty,
    Tick(TickData),
    Kline(KlineData),
    Depth(DepthData),
    Trade(TradeData),
    Order(OrderData),
    Position(PositionData),
    Account(AccountData),
    Log(LogData),
    Signal(SignalData),
    ScanResult(ScanResult),
}

impl EventPayload {
    /// Name of the variant, used in mismatch diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Empty => "empty",
            EventPayload::Tick(_) => "tick",
            EventPayload::Kline(_) => "kline",
            EventPayload::Depth(_) => "depth",
            EventPayload::Trade(_) => "trade",
            EventPayload::Order(_) => "order",
            EventPayload::Position(_) => "position",
            EventPayload::Account(_) => "account",
            EventPayload::Log(_) => "log",
            EventPayload::Signal(_) => "signal",
            EventPayload::ScanResult(_) => "scan_result",
        }
    }

    /// Instrument the payload refers to, when it has one
    pub fn symbol(&self) -> Option<&str> {
        match self {
            EventPayload::Tick(tick) => Some(&tick.symbol),
            EventPayload::Kline(kline) => Some(&kline.symbol),
            EventPayload::Depth(depth) => Some(&depth.symbol),
            EventPayload::Trade(trade) => Some(&trade.symbol),
            EventPayload::Order(order) => Some(&order.symbol),
            EventPayload::Position(position) => Some(&position.symbol),
            EventPayload::Signal(signal) => Some(&signal.symbol),
            EventPayload::ScanResult(result) => Some(&result.symbol),
            EventPayload::Empty | EventPayload::Account(_) | EventPayload::Log(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, EventPayload::Empty)
    }
}

/// Typed, timestamped envelope broadcast through the bus.
///
/// Extras may be set while the producer still owns the event; once wrapped in
/// a [`SharedEvent`] it is read-only.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: EventType,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
    extras: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            payload,
            extras: HashMap::new(),
        }
    }

    pub fn tick(tick: TickData) -> Self {
        Self::new(EventType::Tick, EventPayload::Tick(tick))
    }

    pub fn kline(kline: KlineData) -> Self {
        Self::new(EventType::Kline, EventPayload::Kline(kline))
    }

    pub fn depth(depth: DepthData) -> Self {
        Self::new(EventType::Depth, EventPayload::Depth(depth))
    }

    /// Public market trade print
    pub fn trade(trade: TradeData) -> Self {
        Self::new(EventType::Trade, EventPayload::Trade(trade))
    }

    /// Fill of one of our own orders
    pub fn trade_deal(trade: TradeData) -> Self {
        Self::new(EventType::TradeDeal, EventPayload::Trade(trade))
    }

    pub fn order(order: OrderData) -> Self {
        Self::new(EventType::Order, EventPayload::Order(order))
    }

    pub fn position(position: PositionData) -> Self {
        Self::new(EventType::Position, EventPayload::Position(position))
    }

    pub fn account(account: AccountData) -> Self {
        Self::new(EventType::Account, EventPayload::Account(account))
    }

    pub fn log(log: LogData) -> Self {
        Self::new(EventType::Log, EventPayload::Log(log))
    }

    pub fn error(log: LogData) -> Self {
        Self::new(EventType::Error, EventPayload::Log(log))
    }

    pub fn signal(signal: SignalData) -> Self {
        Self::new(EventType::Signal, EventPayload::Signal(signal))
    }

    pub fn scan_result(result: ScanResult) -> Self {
        Self::new(EventType::ScanResult, EventPayload::ScanResult(result))
    }

    pub fn timer() -> Self {
        Self::new(EventType::Timer, EventPayload::Empty)
    }

    pub fn strategy_start(symbol: &str) -> Self {
        Self::new(EventType::StrategyStart, EventPayload::Empty).with_extra("symbol", symbol)
    }

    pub fn strategy_stop(symbol: &str) -> Self {
        Self::new(EventType::StrategyStop, EventPayload::Empty).with_extra("symbol", symbol)
    }

    /// Builder-style extra; last write for a key wins
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_extra(key, value);
        self
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extras.insert(key.into(), value.into());
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }

    pub fn extras(&self) -> &HashMap<String, String> {
        &self.extras
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Symbol from the payload, falling back to the `symbol` extra
    pub fn symbol(&self) -> Option<&str> {
        self.payload.symbol().or_else(|| self.extra("symbol"))
    }

    /// True for a payload-less event whose type requires a payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.event_type.requires_payload()
    }

    pub fn as_tick(&self) -> Option<&TickData> {
        match &self.payload {
            EventPayload::Tick(tick) => Some(tick),
            _ => None,
        }
    }

    pub fn as_kline(&self) -> Option<&KlineData> {
        match &self.payload {
            EventPayload::Kline(kline) => Some(kline),
            _ => None,
        }
    }

    pub fn as_depth(&self) -> Option<&DepthData> {
        match &self.payload {
            EventPayload::Depth(depth) => Some(depth),
            _ => None,
        }
    }

    pub fn as_trade(&self) -> Option<&TradeData> {
        match &self.payload {
            EventPayload::Trade(trade) => Some(trade),
            _ => None,
        }
    }

    pub fn as_order(&self) -> Option<&OrderData> {
        match &self.payload {
            EventPayload::Order(order) => Some(order),
            _ => None,
        }
    }

    pub fn as_position(&self) -> Option<&PositionData> {
        match &self.payload {
            EventPayload::Position(position) => Some(position),
            _ => None,
        }
    }

    pub fn as_account(&self) -> Option<&AccountData> {
        match &self.payload {
            EventPayload::Account(account) => Some(account),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogData> {
        match &self.payload {
            EventPayload::Log(log) => Some(log),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&SignalData> {
        match &self.payload {
            EventPayload::Signal(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_scan_result(&self) -> Option<&ScanResult> {
        match &self.payload {
            EventPayload::ScanResult(result) => Some(result),
            _ => None,
        }
    }

    /// Freezes the event for publication
    pub fn into_shared(self) -> SharedEvent {
        Arc::new(self)
    }
}
