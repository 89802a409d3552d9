//! In-process simulated broker.
//!
//! Market data is pushed in by the caller (a replay file, the scanner, a
//! test) and fanned out onto the bus for subscribed symbols. Orders fill
//! against the last known price and produce `order` and `trade-deal` events,
//! which is enough to drive the position book and strategy callbacks end to
//! end without a real broker connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use event_bus::{Engine, Event};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use scan_trader_core::{
    KlineData, OrderData, OrderId, OrderSide, OrderStatus, OrderType, Snapshot, Symbol, TickData,
    TradeData,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{validate_order, ExchangeAdapter, ExchangeError, ExchangeResult};

/// Paper exchange settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperExchangeConfig {
    /// Routing name
    pub name: String,

    /// Prices known before any data is pushed
    pub initial_prices: HashMap<Symbol, Decimal>,

    /// Bars retained per symbol for history queries
    pub history_capacity: usize,

    /// Filled or cancelled orders kept for lookup, oldest evicted first
    pub order_retention: usize,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            name: "paper".to_string(),
            initial_prices: HashMap::new(),
            history_capacity: 500,
            order_retention: 1_000,
        }
    }
}

struct PaperBook {
    snapshots: HashMap<Symbol, Snapshot>,
    history: HashMap<Symbol, VecDeque<KlineData>>,
    tick_subscriptions: HashSet<Symbol>,
    kline_subscriptions: HashMap<Symbol, HashSet<String>>,
    orders: HashMap<OrderId, OrderData>,
    // Active limit orders per symbol; the only orders a price update visits
    resting: HashMap<Symbol, Vec<OrderId>>,
    completed: VecDeque<OrderId>,
    order_retention: usize,
}

impl PaperBook {
    fn new(order_retention: usize) -> Self {
        Self {
            snapshots: HashMap::new(),
            history: HashMap::new(),
            tick_subscriptions: HashSet::new(),
            kline_subscriptions: HashMap::new(),
            orders: HashMap::new(),
            resting: HashMap::new(),
            completed: VecDeque::new(),
            order_retention,
        }
    }

    fn insert_order(&mut self, order: OrderData) {
        let order_id = order.order_id.clone();
        let active = order.status.is_active();
        if active {
            self.resting
                .entry(order.symbol.clone())
                .or_default()
                .push(order_id.clone());
        }
        self.orders.insert(order_id.clone(), order);
        if !active {
            self.retire(order_id);
        }
    }

    fn unrest(&mut self, symbol: &str, order_id: &str) {
        if let Some(ids) = self.resting.get_mut(symbol) {
            ids.retain(|id| id != order_id);
            if ids.is_empty() {
                self.resting.remove(symbol);
            }
        }
    }

    /// Queues a completed order for eviction once retention is exceeded
    fn retire(&mut self, order_id: OrderId) {
        self.completed.push_back(order_id);
        while self.completed.len() > self.order_retention {
            if let Some(evicted) = self.completed.pop_front() {
                self.orders.remove(&evicted);
            }
        }
    }

    fn record_price(&mut self, symbol: &str, price: Decimal, volume: Decimal) {
        let now = Utc::now();
        let snapshot = self
            .snapshots
            .entry(symbol.to_string())
            .or_insert_with(|| Snapshot {
                symbol: symbol.to_string(),
                last_price: price,
                open: price,
                high: price,
                low: price,
                prev_close: price,
                volume: Decimal::ZERO,
                bid: price,
                ask: price,
                timestamp: now,
            });
        snapshot.last_price = price;
        snapshot.high = snapshot.high.max(price);
        snapshot.low = snapshot.low.min(price);
        snapshot.volume += volume;
        snapshot.bid = price;
        snapshot.ask = price;
        snapshot.timestamp = now;
    }

    /// Fills resting limit orders the new price crosses
    fn cross_resting(&mut self, symbol: &str, price: Decimal) -> Vec<Event> {
        let Some(ids) = self.resting.get_mut(symbol) else {
            return Vec::new();
        };
        let orders = &mut self.orders;
        let mut events = Vec::new();
        let mut filled = Vec::new();
        ids.retain(|id| {
            let Some(order) = orders.get_mut(id) else {
                return false;
            };
            match order.price {
                Some(limit) if marketable(order.side, limit, price) => {
                    events.extend(fill(order, limit));
                    filled.push(id.clone());
                    false
                }
                _ => true,
            }
        });
        if ids.is_empty() {
            self.resting.remove(symbol);
        }
        for order_id in filled {
            self.retire(order_id);
        }
        events
    }
}

fn marketable(side: OrderSide, limit: Decimal, last: Decimal) -> bool {
    match side {
        OrderSide::Buy => limit >= last,
        OrderSide::Sell => limit <= last,
    }
}

fn fill(order: &mut OrderData, price: Decimal) -> [Event; 2] {
    let now = Utc::now();
    order.filled_quantity = order.quantity;
    order.status = OrderStatus::Filled;
    order.timestamp = now;

    let trade = TradeData {
        trade_id: Uuid::new_v4().to_string(),
        order_id: Some(order.order_id.clone()),
        symbol: order.symbol.clone(),
        side: order.side,
        quantity: order.quantity,
        price,
        timestamp: now,
    };
    [Event::order(order.clone()), Event::trade_deal(trade)]
}

/// Simulated broker publishing onto a shared [`Engine`].
pub struct PaperExchange {
    name: String,
    history_capacity: usize,
    engine: Arc<Engine>,
    connected: AtomicBool,
    book: RwLock<PaperBook>,
}

impl fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaperExchange")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl PaperExchange {
    pub fn new(config: PaperExchangeConfig, engine: Arc<Engine>) -> Self {
        let mut book = PaperBook::new(config.order_retention);
        for (symbol, price) in &config.initial_prices {
            book.record_price(symbol, *price, Decimal::ZERO);
        }
        Self {
            name: config.name,
            history_capacity: config.history_capacity.max(1),
            engine,
            connected: AtomicBool::new(false),
            book: RwLock::new(book),
        }
    }

    /// Default config under a different routing name
    pub fn named(name: impl Into<String>, engine: Arc<Engine>) -> Self {
        Self::new(
            PaperExchangeConfig {
                name: name.into(),
                ..PaperExchangeConfig::default()
            },
            engine,
        )
    }

    /// Records a trade print. Publishes a tick when the symbol is subscribed
    /// and fills any resting limit orders the price crosses.
    pub fn push_tick(&self, tick: TickData) {
        let (subscribed, fills) = {
            let mut book = self.book.write();
            book.record_price(&tick.symbol, tick.price, tick.volume);
            let fills = book.cross_resting(&tick.symbol, tick.price);
            (book.tick_subscriptions.contains(&tick.symbol), fills)
        };
        if subscribed {
            self.engine.publish(Event::tick(tick));
        }
        self.publish_all(fills);
    }

    /// Shorthand for a zero-volume tick
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.push_tick(TickData::new(symbol, price, Decimal::ZERO));
    }

    /// Appends a closed bar to history and publishes it when subscribed for
    /// the bar's interval.
    pub fn push_kline(&self, kline: KlineData) {
        let (subscribed, fills) = {
            let mut book = self.book.write();
            book.record_price(&kline.symbol, kline.close, kline.volume);
            let bars = book.history.entry(kline.symbol.clone()).or_default();
            bars.push_back(kline.clone());
            while bars.len() > self.history_capacity {
                bars.pop_front();
            }
            let fills = book.cross_resting(&kline.symbol, kline.close);
            let subscribed = book
                .kline_subscriptions
                .get(&kline.symbol)
                .map(|intervals| intervals.contains(&kline.interval))
                .unwrap_or(false);
            (subscribed, fills)
        };
        if subscribed {
            self.engine.publish(Event::kline(kline));
        }
        self.publish_all(fills);
    }

    pub fn order(&self, order_id: &str) -> Option<OrderData> {
        self.book.read().orders.get(order_id).cloned()
    }

    pub fn open_orders(&self) -> Vec<OrderData> {
        let book = self.book.read();
        book.resting
            .values()
            .flatten()
            .filter_map(|id| book.orders.get(id))
            .cloned()
            .collect()
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        let book = self.book.read();
        book.tick_subscriptions.contains(symbol) || book.kline_subscriptions.contains_key(symbol)
    }

    fn ensure_connected(&self) -> ExchangeResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ExchangeError::NotConnected(self.name.clone()))
        }
    }

    fn publish_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.engine.publish(event);
        }
    }
}

impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> ExchangeResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(exchange = %self.name, "paper exchange connected");
        }
        Ok(())
    }

    fn disconnect(&self) -> ExchangeResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let mut book = self.book.write();
            book.tick_subscriptions.clear();
            book.kline_subscriptions.clear();
            info!(exchange = %self.name, "paper exchange disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_kline(&self, symbol: &str, interval: &str) -> ExchangeResult<()> {
        self.ensure_connected()?;
        self.book
            .write()
            .kline_subscriptions
            .entry(symbol.to_string())
            .or_default()
            .insert(interval.to_string());
        debug!(exchange = %self.name, symbol, interval, "kline subscribed");
        Ok(())
    }

    fn subscribe_tick(&self, symbol: &str) -> ExchangeResult<()> {
        self.ensure_connected()?;
        self.book.write().tick_subscriptions.insert(symbol.to_string());
        debug!(exchange = %self.name, symbol, "tick subscribed");
        Ok(())
    }

    fn unsubscribe(&self, symbol: &str) -> ExchangeResult<()> {
        let mut book = self.book.write();
        book.tick_subscriptions.remove(symbol);
        book.kline_subscriptions.remove(symbol);
        debug!(exchange = %self.name, symbol, "unsubscribed");
        Ok(())
    }

    fn get_history_kline(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> ExchangeResult<Vec<KlineData>> {
        self.ensure_connected()?;
        let book = self.book.read();
        let Some(bars) = book.history.get(symbol) else {
            return Ok(Vec::new());
        };
        let matching: Vec<&KlineData> = bars.iter().filter(|k| k.interval == interval).collect();
        let skip = matching.len().saturating_sub(count);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    fn get_snapshot(&self, symbol: &str) -> ExchangeResult<Snapshot> {
        self.ensure_connected()?;
        self.book
            .read()
            .snapshots
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::NoMarketData(symbol.to_string()))
    }

    fn get_batch_snapshots(&self, symbols: &[Symbol]) -> ExchangeResult<HashMap<Symbol, Snapshot>> {
        self.ensure_connected()?;
        let book = self.book.read();
        Ok(symbols
            .iter()
            .filter_map(|s| book.snapshots.get(s).map(|snap| (s.clone(), snap.clone())))
            .collect())
    }

    fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        order_type: OrderType,
        price: Option<Decimal>,
    ) -> ExchangeResult<OrderId> {
        self.ensure_connected()?;
        validate_order(symbol, quantity, order_type, price)?;

        let (order_id, events) = {
            let mut book = self.book.write();
            let last = book.snapshots.get(symbol).map(|s| s.last_price);

            let fill_price = match (order_type, price, last) {
                (OrderType::Market, _, Some(last)) => Some(last),
                (OrderType::Market, _, None) => {
                    return Err(ExchangeError::NoMarketData(symbol.to_string()))
                }
                (OrderType::Limit, Some(limit), Some(last)) if marketable(side, limit, last) => {
                    Some(limit)
                }
                // No price yet or not marketable: rest until the market crosses
                (OrderType::Limit, _, _) => None,
            };

            let mut order = OrderData {
                order_id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                side,
                order_type,
                quantity,
                price,
                filled_quantity: Decimal::ZERO,
                status: OrderStatus::Submitted,
                timestamp: Utc::now(),
            };
            let events = match fill_price {
                Some(px) => Vec::from(fill(&mut order, px)),
                None => vec![Event::order(order.clone())],
            };
            let order_id = order.order_id.clone();
            book.insert_order(order);
            (order_id, events)
        };

        info!(exchange = %self.name, symbol, %side, %quantity, order_id = %order_id, "paper order placed");
        self.publish_all(events);
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: &str) -> ExchangeResult<()> {
        self.ensure_connected()?;
        let event = {
            let mut book = self.book.write();
            let order = book
                .orders
                .get_mut(order_id)
                .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;
            if order.status.is_completed() {
                warn!(exchange = %self.name, order_id, status = ?order.status, "cannot cancel completed order");
                return Err(ExchangeError::Rejected(format!(
                    "order {order_id} already {:?}",
                    order.status
                )));
            }
            order.status = OrderStatus::Cancelled;
            order.timestamp = Utc::now();
            let symbol = order.symbol.clone();
            let event = Event::order(order.clone());
            book.unrest(&symbol, order_id);
            book.retire(order_id.to_string());
            event
        };
        self.engine.publish(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn connected_exchange() -> (Arc<Engine>, PaperExchange) {
        let engine = Arc::new(Engine::default());
        let exchange = PaperExchange::named("paper", Arc::clone(&engine));
        exchange.connect().unwrap();
        (engine, exchange)
    }

    #[test]
    fn test_requires_connection() {
        let engine = Arc::new(Engine::default());
        let exchange = PaperExchange::named("paper", engine);
        let err = exchange.subscribe_tick("US.AAPL").unwrap_err();
        assert_eq!(err, ExchangeError::NotConnected("paper".into()));
    }

    #[test]
    fn test_market_order_fills_at_last_price() {
        let (engine, exchange) = connected_exchange();
        exchange.set_price("US.AAPL", dec!(190.5));

        let order_id = exchange
            .place_order("US.AAPL", OrderSide::Buy, dec!(10), OrderType::Market, None)
            .unwrap();

        let order = exchange.order(&order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(10));
        // order + trade-deal; the unsubscribed price update published nothing
        assert_eq!(engine.event_queue_size(), 2);
    }

    #[test]
    fn test_market_order_without_price_is_rejected() {
        let (_engine, exchange) = connected_exchange();
        let err = exchange
            .place_order("US.AAPL", OrderSide::Buy, dec!(1), OrderType::Market, None)
            .unwrap_err();
        assert_eq!(err, ExchangeError::NoMarketData("US.AAPL".into()));
    }

    #[test]
    fn test_limit_order_rests_until_crossed() {
        let (engine, exchange) = connected_exchange();
        exchange.set_price("HK.00700", dec!(300));

        let order_id = exchange
            .place_order("HK.00700", OrderSide::Buy, dec!(100), OrderType::Limit, Some(dec!(295)))
            .unwrap();
        assert_eq!(exchange.open_orders().len(), 1);
        assert_eq!(engine.event_queue_size(), 1);

        exchange.set_price("HK.00700", dec!(294));
        let order = exchange.order(&order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(exchange.open_orders().is_empty());
        assert_eq!(engine.event_queue_size(), 3);
    }

    #[test]
    fn test_cancel_order() {
        let (_engine, exchange) = connected_exchange();
        exchange.set_price("HK.00700", dec!(300));
        let resting = exchange
            .place_order("HK.00700", OrderSide::Sell, dec!(100), OrderType::Limit, Some(dec!(310)))
            .unwrap();
        let filled = exchange
            .place_order("HK.00700", OrderSide::Sell, dec!(100), OrderType::Market, None)
            .unwrap();

        assert!(exchange.cancel_order(&resting).is_ok());
        assert_eq!(exchange.order(&resting).unwrap().status, OrderStatus::Cancelled);
        assert!(matches!(exchange.cancel_order(&filled), Err(ExchangeError::Rejected(_))));
        assert!(matches!(exchange.cancel_order("nope"), Err(ExchangeError::OrderNotFound(_))));
    }

    #[test]
    fn test_settled_orders_leave_the_resting_index() {
        let (engine, exchange) = connected_exchange();
        exchange.set_price("HK.00700", dec!(300));
        let cancelled = exchange
            .place_order("HK.00700", OrderSide::Buy, dec!(100), OrderType::Limit, Some(dec!(290)))
            .unwrap();
        let crossed = exchange
            .place_order("HK.00700", OrderSide::Buy, dec!(100), OrderType::Limit, Some(dec!(295)))
            .unwrap();
        exchange.cancel_order(&cancelled).unwrap();
        assert_eq!(exchange.open_orders().len(), 1);

        exchange.set_price("HK.00700", dec!(294));
        assert_eq!(exchange.order(&crossed).unwrap().status, OrderStatus::Filled);
        assert!(exchange.open_orders().is_empty());
        let queued = engine.event_queue_size();

        // Below both limits again: nothing left to fill
        exchange.set_price("HK.00700", dec!(280));
        assert_eq!(engine.event_queue_size(), queued);
        assert_eq!(exchange.order(&cancelled).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(exchange.order(&crossed).unwrap().filled_quantity, dec!(100));
    }

    #[test]
    fn test_completed_orders_are_evicted_past_retention() {
        let engine = Arc::new(Engine::default());
        let exchange = PaperExchange::new(
            PaperExchangeConfig {
                order_retention: 2,
                ..PaperExchangeConfig::default()
            },
            engine,
        );
        exchange.connect().unwrap();
        exchange.set_price("US.AMD", dec!(100));

        let resting = exchange
            .place_order("US.AMD", OrderSide::Sell, dec!(1), OrderType::Limit, Some(dec!(120)))
            .unwrap();
        let filled: Vec<OrderId> = (0..3)
            .map(|_| {
                exchange
                    .place_order("US.AMD", OrderSide::Buy, dec!(1), OrderType::Market, None)
                    .unwrap()
            })
            .collect();

        assert!(exchange.order(&filled[0]).is_none());
        assert!(exchange.order(&filled[1]).is_some());
        assert!(exchange.order(&filled[2]).is_some());
        // Open orders are never evicted
        assert_eq!(exchange.order(&resting).unwrap().status, OrderStatus::Submitted);
        assert_eq!(exchange.open_orders().len(), 1);
    }

    #[test]
    fn test_subscribed_data_is_published() {
        let (engine, exchange) = connected_exchange();
        exchange.subscribe_tick("US.TSLA").unwrap();
        exchange.subscribe_kline("US.TSLA", "1m").unwrap();

        exchange.set_price("US.TSLA", dec!(250));
        exchange.push_kline(KlineData::flat("US.TSLA", "1m", dec!(251)));
        exchange.push_kline(KlineData::flat("US.TSLA", "5m", dec!(252)));
        assert_eq!(engine.event_queue_size(), 2);

        exchange.unsubscribe("US.TSLA").unwrap();
        exchange.set_price("US.TSLA", dec!(253));
        assert_eq!(engine.event_queue_size(), 2);
        assert!(!exchange.is_subscribed("US.TSLA"));
    }

    #[test]
    fn test_history_and_snapshots() {
        let (_engine, exchange) = connected_exchange();
        for close in [dec!(10), dec!(11), dec!(12), dec!(9)] {
            exchange.push_kline(KlineData::flat("US.AMD", "1m", close));
        }

        let bars = exchange.get_history_kline("US.AMD", "1m", 2).unwrap();
        let closes: Vec<_> = bars.iter().map(|k| k.close).collect();
        assert_eq!(closes, vec![dec!(12), dec!(9)]);
        assert!(exchange.get_history_kline("US.AMD", "5m", 10).unwrap().is_empty());

        let snapshot = exchange.get_snapshot("US.AMD").unwrap();
        assert_eq!(snapshot.last_price, dec!(9));
        assert_eq!(snapshot.high, dec!(12));
        assert_eq!(snapshot.low, dec!(9));

        let batch = exchange
            .get_batch_snapshots(&["US.AMD".to_string(), "US.NVDA".to_string()])
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.contains_key("US.AMD"));
    }
}
