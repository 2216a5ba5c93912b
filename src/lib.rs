// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{Exchange, TickSource};
pub use error::{ExchangeError, ExecutionError, ValidationError};
pub use execution::{ExecutionGateway, PriceFeed, RetryPolicy};
pub use models::*;
pub use strategy::SignalGenerator;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
