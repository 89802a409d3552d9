use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::error::{TradingError, TradingResult};
use crate::types::{PositionData, Symbol, TradeData};

/// Answers whether a symbol currently carries an open position.
///
/// The strategy lifecycle consults this before deleting a strategy instance.
/// Implementations must not call back into the strategy manager.
pub trait PositionManager: Send + Sync {
    /// True if the symbol has a non-zero net position
    fn has_position(&self, symbol: &str) -> bool;

    /// Applies a signed quantity change (buy positive, sell negative) at `price`
    fn update_position(&self, symbol: &str, signed_qty: Decimal, price: Decimal) -> TradingResult<()>;

    /// Current position for the symbol, if any
    fn position(&self, symbol: &str) -> Option<PositionData>;

    /// All open positions
    fn positions(&self) -> Vec<PositionData>;
}

/// In-memory net position book keyed by symbol.
///
/// Flat positions are removed, so `has_position` is a plain key lookup.
#[derive(Default)]
pub struct PositionBook {
    positions: RwLock<HashMap<Symbol, PositionData>>,
}

impl fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionBook")
            .field("open", &self.positions.read().len())
            .finish()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one of our own fills to the book
    pub fn handle_trade(&self, trade: &TradeData) -> TradingResult<()> {
        self.update_position(&trade.symbol, trade.signed_quantity(), trade.price)
    }

    /// Number of symbols with an open position
    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    fn validate(symbol: &str, signed_qty: Decimal, price: Decimal) -> TradingResult<()> {
        if symbol.is_empty() {
            return Err(TradingError::EmptySymbol);
        }
        if signed_qty.is_zero() {
            return Err(TradingError::InvalidQuantity {
                symbol: symbol.to_string(),
                reason: "quantity change must be non-zero".into(),
            });
        }
        if price <= Decimal::ZERO {
            return Err(TradingError::InvalidPrice {
                symbol: symbol.to_string(),
                reason: format!("price must be positive, got {price}"),
            });
        }
        Ok(())
    }
}

impl PositionManager for PositionBook {
    fn has_position(&self, symbol: &str) -> bool {
        self.positions.read().contains_key(symbol)
    }

    fn update_position(&self, symbol: &str, signed_qty: Decimal, price: Decimal) -> TradingResult<()> {
        Self::validate(symbol, signed_qty, price)?;

        let mut positions = self.positions.write();
        let mut entry = match positions.entry(symbol.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(PositionData {
                    symbol: symbol.to_string(),
                    quantity: signed_qty,
                    average_price: price,
                    timestamp: Utc::now(),
                });
                debug!(symbol, quantity = %signed_qty, %price, "position opened");
                return Ok(());
            }
            Entry::Occupied(occupied) => occupied,
        };

        let old_quantity = entry.get().quantity;
        let new_quantity = old_quantity + signed_qty;

        if new_quantity.is_zero() {
            entry.remove();
            debug!(symbol, "position closed");
            return Ok(());
        }

        let position = entry.get_mut();
        let adding = old_quantity.is_sign_positive() == signed_qty.is_sign_positive();
        if adding {
            let old_cost = position.average_price * old_quantity.abs();
            let new_cost = price * signed_qty.abs();
            position.average_price = (old_cost + new_cost) / new_quantity.abs();
        } else if new_quantity.is_sign_positive() != old_quantity.is_sign_positive() {
            // Flipped through zero: the remainder was opened at this fill's price
            position.average_price = price;
        }

        position.quantity = new_quantity;
        position.timestamp = Utc::now();
        debug!(symbol, quantity = %new_quantity, average = %position.average_price, "position updated");
        Ok(())
    }

    fn position(&self, symbol: &str) -> Option<PositionData> {
        self.positions.read().get(symbol).cloned()
    }

    fn positions(&self) -> Vec<PositionData> {
        let mut all: Vec<PositionData> = self.positions.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_and_add_weighted_average() {
        let book = PositionBook::new();
        book.update_position("US.AAPL", dec!(100), dec!(150)).unwrap();
        book.update_position("US.AAPL", dec!(50), dec!(152)).unwrap();

        let position = book.position("US.AAPL").unwrap();
        assert_eq!(position.quantity, dec!(150));
        assert_eq!(position.average_price.round_dp(2), dec!(150.67));
        assert!(book.has_position("US.AAPL"));
    }

    #[test]
    fn test_reduce_keeps_average_and_close_removes() {
        let book = PositionBook::new();
        book.update_position("HK.00700", dec!(200), dec!(300)).unwrap();
        book.update_position("HK.00700", dec!(-50), dec!(320)).unwrap();

        let position = book.position("HK.00700").unwrap();
        assert_eq!(position.quantity, dec!(150));
        assert_eq!(position.average_price, dec!(300));

        book.update_position("HK.00700", dec!(-150), dec!(310)).unwrap();
        assert!(!book.has_position("HK.00700"));
        assert!(book.is_empty());
    }

    #[test]
    fn test_flip_rebases_average() {
        let book = PositionBook::new();
        book.update_position("BTCUSDT", dec!(1), dec!(40000)).unwrap();
        book.update_position("BTCUSDT", dec!(-3), dec!(41000)).unwrap();

        let position = book.position("BTCUSDT").unwrap();
        assert_eq!(position.quantity, dec!(-2));
        assert_eq!(position.average_price, dec!(41000));
    }

    #[test]
    fn test_rejects_invalid_updates() {
        let book = PositionBook::new();
        assert!(matches!(
            book.update_position("US.AAPL", Decimal::ZERO, dec!(1)),
            Err(TradingError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            book.update_position("US.AAPL", dec!(1), dec!(0)),
            Err(TradingError::InvalidPrice { .. })
        ));
        assert_eq!(
            book.update_position("", dec!(1), dec!(1)),
            Err(TradingError::EmptySymbol)
        );
        assert!(book.is_empty());
    }

    #[test]
    fn test_handle_trade_applies_side() {
        let book = PositionBook::new();
        let fill = TradeData {
            trade_id: "t-1".into(),
            order_id: Some("o-1".into()),
            symbol: "US.TSLA".into(),
            side: OrderSide::Sell,
            quantity: dec!(10),
            price: dec!(250),
            timestamp: Utc::now(),
        };
        book.handle_trade(&fill).unwrap();

        assert_eq!(book.position("US.TSLA").unwrap().quantity, dec!(-10));
        assert_eq!(book.positions().len(), 1);
    }
}
