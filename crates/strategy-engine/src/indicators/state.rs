use crate::indicators::prelude::*;

/// Strategy-owned indicator state
pub struct IndicatorState {
    pub buffer: CandleBuffer,
    pub indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorState {
    pub fn new(buffer_depth: usize) -> Self {
        Self {
            buffer: CandleBuffer::new(buffer_depth),
            indicators: Vec::new(),
        }
    }

    /// Adds an indicator and returns its index in [`IndicatorState::update`] output
    pub fn add<I: Indicator + 'static>(&mut self, indicator: I) -> usize {
        self.indicators.push(Box::new(indicator));
        self.indicators.len() - 1
    }

    /// Update all indicators with new candle
    pub fn update(&mut self, candle: Candle) -> Vec<IndicatorValue> {
        let values = self
            .indicators
            .iter_mut()
            .map(|ind| ind.update_ohlcv(&candle))
            .collect();
        self.buffer.push(candle);
        values
    }

    pub fn is_ready(&self) -> bool {
        self.indicators.iter().all(|i| i.is_ready())
    }
}
