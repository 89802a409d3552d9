use crate::indicators::{dec_to_f64, f64_to_dec, Indicator, IndicatorValue};
use rust_decimal::Decimal;

// ============================================================================
// RSI
// ============================================================================
/// Relative Strength Index (RSI).
///
/// Measures the speed and change of price movements.
/// RSI oscillates between zero and 100.
/// Traditionally, and according to Wilder, RSI is considered overbought when above 70 and oversold when below 30.
pub struct Rsi {
    period: usize,
    changes: usize,
    prev_val: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    /// Create a new RSI indicator with the specified period.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            changes: 0,
            prev_val: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &'static str {
        "RSI"
    }

    fn update(&mut self, price: Decimal) -> IndicatorValue {
        let val = dec_to_f64(price);

        if let Some(prev) = self.prev_val {
            let change = val - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            self.changes += 1;
            let n = self.period as f64;

            if self.changes < self.period {
                // Accumulate the first window
                self.avg_gain += gain;
                self.avg_loss += loss;
            } else if self.changes == self.period {
                self.avg_gain = (self.avg_gain + gain) / n;
                self.avg_loss = (self.avg_loss + loss) / n;
            } else {
                // Wilder smoothing: (PREV * (N-1) + CURR) / N
                self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
                self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
            }
        }
        self.prev_val = Some(val);

        IndicatorValue {
            value: f64_to_dec(self.value()),
            signal: None,
        }
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.is_ready().then(|| IndicatorValue {
            value: f64_to_dec(self.value()),
            signal: None,
        })
    }

    /// Price samples needed: one more than the period, since RSI works on changes
    fn warmup_period(&self) -> usize {
        self.period + 1
    }

    fn is_ready(&self) -> bool {
        self.changes >= self.period
    }
}
