use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::OrderType;

/// Caller input that can never be submitted. Raised before any network call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid order type: {0}")]
    InvalidType(String),

    #[error("Quantity {quantity} rounds below the minimum tradable size ({minimum})")]
    QuantityTooSmall { quantity: Decimal, minimum: Decimal },

    #[error("Price required for {0} orders")]
    PriceRequired(OrderType),

    #[error("Stop price required for {0} orders")]
    StopPriceRequired(OrderType),
}

/// Raw failure reported by an exchange collaborator, before classification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Exchange API error (HTTP {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to decode exchange response: {0}")]
    Decode(String),

    #[error("Operation not supported by this exchange")]
    Unsupported,
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Decode(err.to_string())
    }
}

/// Classified outcome of an order operation, as surfaced to callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("Fatal exchange failure: {0}")]
    Fatal(String),

    #[error("Operation not supported by the exchange")]
    Unsupported,

    /// The exchange answered but the reply could not be read; the order may
    /// be live. Reconcile with an order status query before acting again.
    #[error("Outcome unconfirmed (client order id {client_order_id:?}): {message}")]
    Unconfirmed {
        client_order_id: Option<String>,
        message: String,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl ExecutionError {
    /// Session-ending failures; callers should stop issuing orders
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Fatal(_))
    }

    /// The request may have taken effect on the exchange
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, ExecutionError::Unconfirmed { .. })
    }
}
