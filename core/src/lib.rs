//! Scan Trader core types.
//!
//! Market data shapes carried by bus events, order and position records, and
//! the [`PositionManager`] contract the strategy lifecycle consults before
//! tearing a strategy down.

pub mod error;
pub mod position;
pub mod types;

pub use error::{TradingError, TradingResult};
pub use position::{PositionBook, PositionManager};
pub use types::*;
