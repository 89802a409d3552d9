//! Momentum strategy
//!
//! Goes long when the fast EMA crosses above the slow EMA (or RSI is oversold
//! while the fast EMA leads) and the latest scan still qualifies the symbol.
//! Exits the long on a cross back down or once RSI turns overbought. Only
//! one order is outstanding at a time. After the symbol drops out of the scan
//! with a position still open, the instance only exits.

use chrono::Utc;
use event_bus::Event;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scan_trader_core::{
    KlineData, OrderId, OrderSide, OrderType, ScanResult, SignalData, Snapshot, TickData, TradeData,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::indicators::prelude::*;
use crate::indicators::dec_to_f64;
use crate::traits::{BoxedStrategy, Strategy, StrategyContext, StrategyError, StrategyFactory, StrategyResult};

/// Configuration for momentum strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    /// RSI period
    pub rsi_period: usize,
    /// Fast EMA period
    pub ema_fast_period: usize,
    /// Slow EMA period
    pub ema_slow_period: usize,
    /// RSI Overbought threshold
    pub rsi_overbought: Decimal,
    /// RSI Oversold threshold
    pub rsi_oversold: Decimal,
    /// Units per entry order
    pub order_quantity: Decimal,
    /// Minimum scan change % for new entries
    pub min_change_pct: Decimal,
    /// Worst scan rank still allowed to enter; `None` accepts any rank
    pub max_rank: Option<u32>,
    /// Candles kept for lookback
    pub lookback: usize,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_fast_period: 9,
            ema_slow_period: 21,
            rsi_overbought: dec!(70),
            rsi_oversold: dec!(30),
            order_quantity: dec!(1),
            min_change_pct: Decimal::ZERO,
            max_rank: None,
            lookback: 200,
        }
    }
}

impl MomentumConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        if self.rsi_period == 0 || self.ema_fast_period == 0 {
            return Err(StrategyError::InvalidConfig("indicator periods must be positive".into()));
        }
        if self.ema_fast_period >= self.ema_slow_period {
            return Err(StrategyError::InvalidConfig(format!(
                "fast EMA period {} must be shorter than slow period {}",
                self.ema_fast_period, self.ema_slow_period
            )));
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err(StrategyError::InvalidConfig(format!(
                "RSI oversold {} must be below overbought {}",
                self.rsi_oversold, self.rsi_overbought
            )));
        }
        if self.order_quantity <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig("order quantity must be positive".into()));
        }
        Ok(())
    }
}

/// EMA crossover strategy gated by RSI and scan eligibility.
pub struct MomentumStrategy {
    ctx: StrategyContext,
    config: MomentumConfig,
    running: bool,
    eligible: bool,
    // Exit-only once dropped from the scan
    retired: bool,

    // Indicator state
    state: IndicatorState,
    rsi_idx: usize,
    ema_fast_idx: usize,
    ema_slow_idx: usize,
    prev_spread: Option<Decimal>,

    last_price: Option<Decimal>,
    pending_order: Option<OrderId>,
}

impl MomentumStrategy {
    pub fn new(ctx: StrategyContext, config: MomentumConfig) -> StrategyResult<Self> {
        config.validate()?;

        let mut state = IndicatorState::new(config.lookback);
        let rsi_idx = state.add(Rsi::new(config.rsi_period));
        let ema_fast_idx = state.add(Ema::new(config.ema_fast_period));
        let ema_slow_idx = state.add(Ema::new(config.ema_slow_period));

        Ok(Self {
            ctx,
            config,
            running: false,
            eligible: false,
            retired: false,
            state,
            rsi_idx,
            ema_fast_idx,
            ema_slow_idx,
            prev_spread: None,
            last_price: None,
            pending_order: None,
        })
    }

    /// Factory building one instance per symbol from a shared config
    pub fn factory(config: MomentumConfig) -> impl StrategyFactory {
        move |ctx: StrategyContext, _result: &ScanResult| -> StrategyResult<BoxedStrategy> {
            let symbol = ctx.symbol.clone();
            let strategy = MomentumStrategy::new(ctx, config.clone()).map_err(|err| {
                StrategyError::Factory {
                    symbol,
                    reason: err.to_string(),
                }
            })?;
            Ok(Box::new(strategy))
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible && !self.retired
    }

    /// No new entries once set; exits still run
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn pending_order(&self) -> Option<&str> {
        self.pending_order.as_deref()
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    fn held_quantity(&self) -> Decimal {
        self.ctx
            .positions
            .position(&self.ctx.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    fn on_candle(&mut self, candle: Candle) -> StrategyResult<()> {
        let values = self.state.update(candle);
        if !self.state.is_ready() {
            return Ok(());
        }

        let rsi = values[self.rsi_idx].value;
        let spread = values[self.ema_fast_idx].value - values[self.ema_slow_idx].value;
        let prev = self.prev_spread.replace(spread);
        let crossed_up = matches!(prev, Some(p) if p <= Decimal::ZERO) && spread > Decimal::ZERO;
        let crossed_down = matches!(prev, Some(p) if p >= Decimal::ZERO) && spread < Decimal::ZERO;

        if !self.running || self.pending_order.is_some() {
            return Ok(());
        }

        let held = self.held_quantity();
        let oversold_bounce = rsi < self.config.rsi_oversold && spread > Decimal::ZERO;
        if held.is_zero()
            && self.is_eligible()
            && (crossed_up || oversold_bounce)
            && rsi < self.config.rsi_overbought
        {
            let strength = dec_to_f64((self.config.rsi_overbought - rsi) / dec!(100));
            let reason = if crossed_up {
                format!("EMA cross up, RSI {rsi:.2}")
            } else {
                format!("oversold bounce, RSI {rsi:.2}")
            };
            return self.submit(OrderSide::Buy, self.config.order_quantity, strength, reason);
        }
        if held > Decimal::ZERO && (crossed_down || rsi > self.config.rsi_overbought) {
            let reason = if crossed_down {
                format!("EMA cross down, RSI {rsi:.2}")
            } else {
                format!("RSI overbought {rsi:.2}")
            };
            return self.submit(OrderSide::Sell, held, 1.0, reason);
        }
        Ok(())
    }

    fn submit(&mut self, side: OrderSide, quantity: Decimal, strength: f64, reason: String) -> StrategyResult<()> {
        let symbol = self.ctx.symbol.clone();
        self.ctx.engine.publish(Event::signal(SignalData {
            symbol: symbol.clone(),
            side,
            strength,
            reason: reason.clone(),
            timestamp: Utc::now(),
        }));

        match self
            .ctx
            .exchange
            .place_order(&symbol, side, quantity, OrderType::Market, None)
        {
            Ok(order_id) => {
                info!(symbol = %symbol, %side, %quantity, order_id = %order_id, reason = %reason, "momentum order placed");
                self.ctx
                    .logger
                    .info(format!("{side} {quantity} {symbol} ({reason})"));
                self.pending_order = Some(order_id);
                Ok(())
            }
            Err(err) => {
                self.ctx
                    .logger
                    .error(format!("{side} {quantity} {symbol} failed: {err}"));
                Err(err.into())
            }
        }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn start(&mut self) -> StrategyResult<()> {
        if !self.running {
            self.running = true;
            debug!(symbol = %self.ctx.symbol, exchange = %self.ctx.exchange_name, "momentum strategy started");
        }
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(order_id) = self.pending_order.take() {
            if let Err(err) = self.ctx.exchange.cancel_order(&order_id) {
                warn!(symbol = %self.ctx.symbol, order_id = %order_id, error = %err, "could not cancel pending order");
            }
        }
        debug!(symbol = %self.ctx.symbol, "momentum strategy stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn on_scan_result(&mut self, result: &ScanResult) -> StrategyResult<()> {
        let rank_ok = self.config.max_rank.map_or(true, |max| result.rank <= max);
        self.eligible = rank_ok && result.change_pct >= self.config.min_change_pct;
        self.last_price = Some(result.last_price);
        debug!(symbol = %result.symbol, rank = result.rank, eligible = self.eligible, "scan result");
        Ok(())
    }

    fn on_kline(&mut self, symbol: &str, kline: &KlineData) -> StrategyResult<()> {
        if symbol != self.ctx.symbol {
            return Ok(());
        }
        self.last_price = Some(kline.close);
        self.on_candle(Candle::from(kline))
    }

    fn on_tick(&mut self, symbol: &str, tick: &TickData) -> StrategyResult<()> {
        if symbol == self.ctx.symbol {
            self.last_price = Some(tick.price);
        }
        Ok(())
    }

    fn on_snapshot(&mut self, snapshot: &Snapshot) -> StrategyResult<()> {
        if snapshot.symbol == self.ctx.symbol {
            self.last_price = Some(snapshot.last_price);
        }
        Ok(())
    }

    fn on_trade(&mut self, trade: &TradeData) -> StrategyResult<()> {
        if trade.order_id.is_some() && trade.order_id == self.pending_order {
            debug!(symbol = %trade.symbol, price = %trade.price, "pending order filled");
            self.pending_order = None;
        }
        Ok(())
    }

    fn on_deactivated(&mut self) {
        if !self.retired {
            self.retired = true;
            info!(symbol = %self.ctx.symbol, "momentum strategy retired, exits only");
        }
    }
}
