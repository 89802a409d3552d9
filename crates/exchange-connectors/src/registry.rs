//! Named adapter set with symbol-to-exchange routing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{ExchangeAdapter, ExchangeError, ExchangeResult};

/// Routing rules from symbol to exchange name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Exchange used when no prefix matches
    pub default_exchange: String,

    /// Symbol prefix to exchange name, e.g. "HK." -> "futu"; longest match wins
    pub prefixes: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_exchange: "paper".to_string(),
            prefixes: HashMap::new(),
        }
    }
}

/// Registered adapters keyed by name. Cheap to clone; adapters are shared.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    adapters: BTreeMap<String, Arc<dyn ExchangeAdapter>>,
    routing: RoutingConfig,
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &self.names())
            .field("routing", &self.routing)
            .finish()
    }
}

impl ExchangeRegistry {
    pub fn new(routing: RoutingConfig) -> Self {
        Self {
            adapters: BTreeMap::new(),
            routing,
        }
    }

    /// Adds an adapter under its own name, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ExchangeAdapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            warn!(exchange = %name, "replaced previously registered exchange");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Picks the exchange for a symbol: the caller's preference if registered,
    /// then the longest configured prefix, then the default exchange.
    pub fn route(
        &self,
        symbol: &str,
        preferred: Option<&str>,
    ) -> ExchangeResult<(String, Arc<dyn ExchangeAdapter>)> {
        if let Some(name) = preferred {
            match self.adapters.get(name) {
                Some(adapter) => return Ok((name.to_string(), Arc::clone(adapter))),
                None => warn!(symbol, exchange = name, "preferred exchange not registered"),
            }
        }

        let by_prefix = self
            .routing
            .prefixes
            .iter()
            .filter(|(prefix, name)| symbol.starts_with(prefix.as_str()) && self.adapters.contains_key(*name))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, name)| name.as_str());

        let name = by_prefix.unwrap_or(self.routing.default_exchange.as_str());
        self.adapters
            .get(name)
            .map(|adapter| (name.to_string(), Arc::clone(adapter)))
            .ok_or_else(|| ExchangeError::UnknownExchange(name.to_string()))
    }

    /// Connects every adapter, returning the failures
    pub fn connect_all(&self) -> Vec<(String, ExchangeError)> {
        let mut failures = Vec::new();
        for (name, adapter) in &self.adapters {
            match adapter.connect() {
                Ok(()) => info!(exchange = %name, "exchange connected"),
                Err(err) => {
                    error!(exchange = %name, error = %err, "exchange connection failed");
                    failures.push((name.clone(), err));
                }
            }
        }
        failures
    }

    pub fn disconnect_all(&self) {
        for (name, adapter) in &self.adapters {
            if let Err(err) = adapter.disconnect() {
                warn!(exchange = %name, error = %err, "exchange disconnect failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PaperExchange;
    use event_bus::Engine;

    // `Result::unwrap_err` needs the Ok type to be Debug.
    impl fmt::Debug for dyn ExchangeAdapter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    fn registry(prefixes: &[(&str, &str)]) -> ExchangeRegistry {
        let engine = Arc::new(Engine::default());
        let routing = RoutingConfig {
            default_exchange: "paper".into(),
            prefixes: prefixes
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect(),
        };
        let mut registry = ExchangeRegistry::new(routing);
        for name in ["paper", "futu", "ibkr"] {
            registry.register(Arc::new(PaperExchange::named(name, Arc::clone(&engine))));
        }
        registry
    }

    #[test]
    fn test_route_prefers_requested_exchange() {
        let registry = registry(&[("US.", "futu")]);
        let (name, adapter) = registry.route("US.AAPL", Some("ibkr")).unwrap();
        assert_eq!(name, "ibkr");
        assert_eq!(adapter.name(), "ibkr");

        // Unknown preference falls back to prefix routing
        let (name, _) = registry.route("US.AAPL", Some("binance")).unwrap();
        assert_eq!(name, "futu");
    }

    #[test]
    fn test_route_longest_prefix_wins() {
        let registry = registry(&[("US.", "futu"), ("US.ETF.", "ibkr")]);
        assert_eq!(registry.route("US.ETF.SPY", None).unwrap().0, "ibkr");
        assert_eq!(registry.route("US.MSFT", None).unwrap().0, "futu");
        assert_eq!(registry.route("BTCUSDT", None).unwrap().0, "paper");
    }

    #[test]
    fn test_route_skips_unregistered_prefix_targets() {
        let registry = registry(&[("HK.", "hkex")]);
        assert_eq!(registry.route("HK.00700", None).unwrap().0, "paper");
    }

    #[test]
    fn test_route_without_default_fails() {
        let registry = ExchangeRegistry::new(RoutingConfig::default());
        assert_eq!(
            registry.route("US.AAPL", None).unwrap_err(),
            ExchangeError::UnknownExchange("paper".into())
        );
    }

    #[test]
    fn test_connect_all() {
        let registry = registry(&[]);
        assert!(registry.connect_all().is_empty());
        assert!(registry.get("futu").map(|a| a.is_connected()).unwrap_or(false));
        registry.disconnect_all();
        assert!(!registry.get("futu").map(|a| a.is_connected()).unwrap_or(true));
        assert_eq!(registry.names(), vec!["futu", "ibkr", "paper"]);
    }
}
