//! Built-in strategies

pub mod momentum;

pub use momentum::{MomentumConfig, MomentumStrategy};
