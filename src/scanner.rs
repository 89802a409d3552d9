//! Watchlist scanner
//!
//! Ranks a fixed watchlist by percent change using batch snapshots from
//! whichever exchange each symbol routes to. The result feeds
//! [`StrategyManager::process_scan_results`](strategy_engine::StrategyManager::process_scan_results)
//! directly, not through the bus.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;
use exchange_connectors::ExchangeRegistry;
use rust_decimal::prelude::ToPrimitive;
use scan_trader_core::{ScanResult, Symbol};
use tracing::{debug, warn};

use crate::config::ScannerConfig;

/// Builds ranked scan results from exchange snapshots
#[derive(Debug, Clone)]
pub struct WatchlistScanner {
    config: ScannerConfig,
    exchanges: ExchangeRegistry,
}

impl WatchlistScanner {
    /// Creates a scanner over the given exchanges
    pub fn new(config: ScannerConfig, exchanges: ExchangeRegistry) -> Self {
        Self { config, exchanges }
    }

    /// Scanner settings
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs one scan. Symbols without a route or snapshot are skipped.
    pub fn scan(&self) -> Vec<ScanResult> {
        let mut by_exchange: BTreeMap<String, Vec<Symbol>> = BTreeMap::new();
        for symbol in &self.config.watchlist {
            match self.exchanges.route(symbol, None) {
                Ok((name, _)) => by_exchange.entry(name).or_default().push(symbol.clone()),
                Err(err) => warn!(symbol = %symbol, error = %err, "no exchange for watchlist symbol"),
            }
        }

        let now = Utc::now();
        let mut candidates = Vec::new();
        for (name, symbols) in by_exchange {
            let Some(exchange) = self.exchanges.get(&name) else {
                continue;
            };
            let snapshots = match exchange.get_batch_snapshots(&symbols) {
                Ok(snapshots) => snapshots,
                Err(err) => {
                    warn!(exchange = %name, error = %err, "snapshot request failed");
                    continue;
                }
            };

            for snapshot in snapshots.into_values() {
                let change_pct = snapshot.change_pct();
                if change_pct < self.config.min_change_pct {
                    continue;
                }
                candidates.push(ScanResult {
                    symbol: snapshot.symbol,
                    rank: 0,
                    last_price: snapshot.last_price,
                    change_pct,
                    volume: snapshot.volume,
                    score: change_pct.to_f64().unwrap_or_default(),
                    exchange: Some(name.clone()),
                    timestamp: now,
                });
            }
        }

        rank(&mut candidates, self.config.max_results);
        debug!(candidates = candidates.len(), "scan complete");
        candidates
    }
}

/// Orders by change descending (symbol breaks ties), truncates, assigns 1-based ranks
fn rank(candidates: &mut Vec<ScanResult>, max_results: usize) {
    candidates.sort_by(|a, b| match b.change_pct.cmp(&a.change_pct) {
        Ordering::Equal => a.symbol.cmp(&b.symbol),
        other => other,
    });
    candidates.truncate(max_results);
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = i as u32 + 1;
    }
}
