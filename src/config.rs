//! Host configuration
//!
//! Loaded from an optional TOML file, then overridden by `SCAN_TRADER__*`
//! environment variables (`SCAN_TRADER__STRATEGY__MAX_INSTANCES=20`).
//! `SCAN_TRADER_WATCHLIST` takes a comma separated symbol list.

use std::env;

use config::{Config, ConfigError, Environment, File};
use event_bus::EngineConfig;
use exchange_connectors::{PaperExchangeConfig, RoutingConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strategy_engine::{MomentumConfig, StrategyManagerConfig};
use tracing::{info, warn};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/scan-trader.toml";

/// Complete host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Event bus settings
    pub engine: EngineConfig,

    /// Strategy lifecycle settings
    pub strategy: StrategyManagerConfig,

    /// Symbol to exchange routing
    pub routing: RoutingConfig,

    /// Parameters shared by every momentum strategy instance
    pub momentum: MomentumConfig,

    /// Watchlist scanner settings
    pub scanner: ScannerConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Simulated exchanges registered at startup
    pub exchanges: Vec<PaperExchangeConfig>,
}

impl AppConfig {
    /// Loads configuration from `path` (optional) and the environment
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SCAN_TRADER")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(watchlist) = env::var("SCAN_TRADER_WATCHLIST") {
            let symbols: Vec<String> = watchlist
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            if !symbols.is_empty() {
                builder = builder.set_override("scanner.watchlist", symbols)?;
            }
        }

        let mut app_config: AppConfig = builder.build()?.try_deserialize()?;
        if app_config.exchanges.is_empty() {
            app_config.exchanges.push(PaperExchangeConfig {
                name: app_config.routing.default_exchange.clone(),
                ..PaperExchangeConfig::default()
            });
        }

        app_config.validate()?;

        info!("Configuration loaded from {}", path);
        info!("  Exchanges: {:?}", app_config.exchange_names());
        info!("  Default exchange: {}", app_config.routing.default_exchange);
        info!("  Watchlist: {} symbols", app_config.scanner.watchlist.len());
        info!("  Scan interval: {}s", app_config.scanner.interval_secs);
        info!("  Route to inactive: {}", app_config.strategy.route_to_inactive);

        Ok(app_config)
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.interval_secs == 0 {
            return Err(ConfigError::Message(
                "Scan interval must be greater than 0".to_string(),
            ));
        }

        if self.scanner.max_results == 0 {
            return Err(ConfigError::Message(
                "Scanner max_results must be greater than 0".to_string(),
            ));
        }

        if self.strategy.max_instances == Some(0) {
            return Err(ConfigError::Message(
                "max_instances must be greater than 0 when set".to_string(),
            ));
        }

        if self.strategy.kline_interval.is_empty() {
            return Err(ConfigError::Message(
                "Kline interval cannot be empty".to_string(),
            ));
        }

        if self.exchanges.iter().any(|e| e.name.is_empty()) {
            return Err(ConfigError::Message(
                "Exchange name cannot be empty".to_string(),
            ));
        }

        self.momentum
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        let names = self.exchange_names();
        if !names.contains(&self.routing.default_exchange) {
            warn!(
                "Default exchange '{}' is not configured; unrouted symbols will be skipped",
                self.routing.default_exchange
            );
        }
        for (prefix, target) in &self.routing.prefixes {
            if !names.contains(target) {
                warn!("Routing prefix '{}' targets unknown exchange '{}'", prefix, target);
            }
        }

        if self.scanner.watchlist.is_empty() {
            warn!("Scanner watchlist is empty - no strategies will be created");
        }

        Ok(())
    }

    /// Names of the configured exchanges, in declaration order
    pub fn exchange_names(&self) -> Vec<String> {
        self.exchanges.iter().map(|e| e.name.clone()).collect()
    }
}

/// Watchlist scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Symbols considered on every scan
    pub watchlist: Vec<String>,

    /// Seconds between scan cycles
    pub interval_secs: u64,

    /// Candidates kept per scan, best first
    pub max_results: usize,

    /// Minimum percent change versus previous close
    pub min_change_pct: Decimal,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            interval_secs: 60,
            max_results: 10,
            min_change_pct: Decimal::ZERO,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Directory for the daily rolling log file
    pub directory: String,

    /// Emit JSON lines on stdout
    pub json: bool,

    /// Seconds between status lines
    pub status_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            json: false,
            status_interval_secs: 30,
        }
    }
}
