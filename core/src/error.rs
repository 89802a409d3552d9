use thiserror::Error;

/// Errors raised by core trading bookkeeping
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradingError {
    #[error("Invalid quantity for {symbol}: {reason}")]
    InvalidQuantity { symbol: String, reason: String },

    #[error("Invalid price for {symbol}: {reason}")]
    InvalidPrice { symbol: String, reason: String },

    #[error("Empty symbol")]
    EmptySymbol,
}

pub type TradingResult<T> = Result<T, TradingError>;
