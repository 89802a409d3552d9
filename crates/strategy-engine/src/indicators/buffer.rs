use rust_decimal::Decimal;
use scan_trader_core::KlineData;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// OHLCV candle for indicator calculations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

impl From<&KlineData> for Candle {
    fn from(kline: &KlineData) -> Self {
        Self {
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
            timestamp: kline.timestamp.timestamp(),
        }
    }
}

/// Ring buffer with configurable depth for indicator lookback
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    inner: VecDeque<Candle>,
    capacity: usize,
}

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push candle, evicting oldest if at capacity. Returns evicted candle if any.
    pub fn push(&mut self, candle: Candle) -> Option<Candle> {
        let evicted = if self.inner.len() >= self.capacity {
            self.inner.pop_front()
        } else {
            None
        };
        self.inner.push_back(candle);
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.capacity
    }

    /// Get last N candles (most recent last)
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &Candle> {
        let skip = self.inner.len().saturating_sub(n);
        self.inner.iter().skip(skip)
    }

    /// Latest candle
    pub fn latest(&self) -> Option<&Candle> {
        self.inner.back()
    }
}
