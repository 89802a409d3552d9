use crate::indicators::{Indicator, IndicatorValue};
use rust_decimal::Decimal;

// ============================================================================
// EMA
// ============================================================================
/// Exponential Moving Average (EMA).
///
/// Seeded with the first price and smoothed with `2 / (period + 1)`, all in
/// decimal arithmetic so the value is exact for price comparisons.
pub struct Ema {
    alpha: Decimal,
    current: Option<Decimal>,
    samples: usize,
    period: usize,
}

impl Ema {
    /// Create a new EMA. A zero period is treated as one.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            alpha: Decimal::TWO / Decimal::from(period + 1),
            current: None,
            samples: 0,
            period,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn update(&mut self, price: Decimal) -> IndicatorValue {
        let next = match self.current {
            Some(prev) => prev + self.alpha * (price - prev),
            None => price,
        };
        self.current = Some(next);
        self.samples += 1;
        IndicatorValue {
            value: next,
            signal: None,
        }
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.current.map(|value| IndicatorValue {
            value,
            signal: None,
        })
    }

    fn warmup_period(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.samples >= self.period
    }
}
