// Exchange collaborators: the REST execution API and the ticker stream
pub mod binance;
pub mod mock;
pub mod ticker_stream;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ExchangeError;
use crate::models::{
    Balance, Bar, Instrument, OcoOrderResult, OcoRequest, OrderRequest, OrderResult,
};

pub use binance::{BinanceClient, Credentials};
pub use mock::MockExchange;
pub use ticker_stream::BinanceTickerStream;

/// Spot exchange execution API
///
/// Every call is a network round-trip. Implementations report raw failures;
/// classification and retry belong to the execution gateway.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Connectivity and credentials check
    async fn ping(&self) -> Result<(), ExchangeError>;

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError>;

    /// Trading rules for a symbol, `None` if the exchange does not list it
    async fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, ExchangeError>;

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError>;

    /// Native take-profit/stop-loss pair. Exchanges without it keep the default.
    async fn create_oco_order(
        &self,
        _request: &OcoRequest,
    ) -> Result<OcoOrderResult, ExchangeError> {
        Err(ExchangeError::Unsupported)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64)
        -> Result<OrderResult, ExchangeError>;

    async fn get_order(&self, symbol: &str, order_id: u64) -> Result<OrderResult, ExchangeError>;

    /// Historical bars, oldest first
    async fn klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: u32,
    ) -> Result<Vec<Bar>, ExchangeError> {
        Err(ExchangeError::Unsupported)
    }
}

/// Source of raw ticker messages
///
/// Messages are delivered unparsed; the price feed owns parsing so that a
/// malformed message is dropped there instead of killing the connection.
/// The subscription ends when the receiver is dropped.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn subscribe(
        &self,
        symbols: &[String],
    ) -> Result<mpsc::UnboundedReceiver<String>, ExchangeError>;
}
