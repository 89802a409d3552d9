use serde::{Deserialize, Serialize};

/// Lifecycle manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyManagerConfig {
    /// Keep routing kline, tick and trade-deal events to instances that were
    /// retired while holding a position, so they can manage the exit
    pub route_to_inactive: bool,

    /// Upper bound on live instances; `None` is unlimited
    pub max_instances: Option<usize>,

    /// Bar interval subscribed and used for warm-up history
    pub kline_interval: String,

    /// Historical bars replayed into a new instance before its scan result
    pub warmup_bars: usize,

    /// Subscribe ticks and klines on creation, unsubscribe on removal
    pub subscribe_market_data: bool,
}

impl Default for StrategyManagerConfig {
    fn default() -> Self {
        Self {
            route_to_inactive: true,
            max_instances: None,
            kline_interval: "1m".to_string(),
            warmup_bars: 0,
            subscribe_market_data: true,
        }
    }
}
