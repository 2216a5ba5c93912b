use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::validator::OrderValidator;
use crate::api::Exchange;
use crate::error::{ExchangeError, ExecutionError};
use crate::models::{
    Balance, Bar, Instrument, OcoOrderResult, OcoRequest, OrderIntent, OrderRequest, OrderResult,
    OrderType, Side,
};
use crate::persistence::OrderStore;

/// How an exchange outcome is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accepted,
    /// Business-rule refusal, surfaced immediately
    Rejected,
    /// Network, timeout, rate limit; retried
    Transient,
    /// Credentials or connectivity breakdown; ends the session
    Fatal,
    /// Operation not offered by this exchange
    Unsupported,
    /// Answered with something unreadable; the request may have landed
    Unconfirmed,
}

// Binance spot error codes that are worth retrying
const TRANSIENT_CODES: &[i64] = &[
    -1000, // unknown error while processing
    -1001, // internal disconnect
    -1003, // too many requests
    -1006, // unexpected response from message bus, status unknown
    -1007, // timeout waiting for backend
    -1008, // server overloaded
    -1015, // too many new orders
    -1021, // timestamp outside recvWindow
];

// Codes that mean our credentials are unusable
const FATAL_CODES: &[i64] = &[
    -1002, // unauthorized
    -1022, // invalid signature
    -2014, // bad API key format
    -2015, // invalid API key, IP, or permissions
];

pub fn classify<T>(result: &Result<T, ExchangeError>) -> Classification {
    match result {
        Ok(_) => Classification::Accepted,
        Err(err) => classify_error(err),
    }
}

pub fn classify_error(err: &ExchangeError) -> Classification {
    match err {
        ExchangeError::Network(_) | ExchangeError::Timeout => Classification::Transient,
        ExchangeError::Unsupported => Classification::Unsupported,
        // The exchange answered; resending could duplicate the order
        ExchangeError::Decode(_) => Classification::Unconfirmed,
        ExchangeError::Api { status, code, .. } => {
            if FATAL_CODES.contains(code) || matches!(status, 401 | 403 | 418) {
                Classification::Fatal
            } else if TRANSIENT_CODES.contains(code) || *status == 429 || *status >= 500 {
                Classification::Transient
            } else {
                Classification::Rejected
            }
        }
    }
}

/// Bounded retry with exponential backoff, applied to transient failures only
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): doubling, capped, plus up to 25% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = delay.as_millis() as u64 / 4;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Single point through which every order reaches the exchange
///
/// Validates and quantizes each order against cached instrument rules,
/// classifies exchange failures and retries the transient ones. Accepted
/// orders are handed to the order store, whose failures are only logged.
pub struct ExecutionGateway {
    exchange: Arc<dyn Exchange>,
    validator: OrderValidator,
    retry: RetryPolicy,
    instruments: RwLock<HashMap<String, Instrument>>,
    store: Option<Arc<dyn OrderStore>>,
}

impl ExecutionGateway {
    pub fn new(exchange: Arc<dyn Exchange>, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            validator: OrderValidator::new(),
            retry,
            instruments: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Instrument rules for a symbol, fetched once per session
    pub async fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, ExecutionError> {
        let symbol = symbol.trim().to_uppercase();

        if let Some(cached) = self.cached_instrument(&symbol) {
            return Ok(Some(cached));
        }

        let fetched = self
            .with_retry("instrument", || self.exchange.instrument(&symbol))
            .await?;

        if let Some(instrument) = &fetched {
            tracing::debug!(
                symbol = %instrument.symbol,
                step_size = %instrument.step_size,
                tick_size = %instrument.tick_size,
                "Cached instrument rules"
            );
            self.instruments
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(symbol, instrument.clone());
        }

        Ok(fetched)
    }

    fn cached_instrument(&self, symbol: &str) -> Option<Instrument> {
        self.instruments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
    }

    /// Validate and quantize a typed intent without submitting it
    pub async fn prepare(&self, intent: &OrderIntent) -> Result<OrderRequest, ExecutionError> {
        let instrument = self.instrument(&intent.symbol).await?;
        Ok(self.validator.validate(intent, instrument.as_ref())?)
    }

    /// Validate, quantize and submit
    pub async fn place(&self, intent: &OrderIntent) -> Result<OrderResult, ExecutionError> {
        let request = self.prepare(intent).await?;
        self.submit(&request).await
    }

    /// Same as [`place`](Self::place) for input whose side and type are still text
    pub async fn place_raw(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Result<OrderResult, ExecutionError> {
        // Bad text needs no instrument rules, so it never waits on the network
        if self.cached_instrument(&symbol.trim().to_uppercase()).is_none() {
            side.parse::<Side>()?;
            order_type.parse::<OrderType>()?;
        }

        let instrument = self.instrument(symbol).await?;
        let request = self.validator.validate_raw(
            symbol,
            side,
            order_type,
            quantity,
            price,
            stop_price,
            instrument.as_ref(),
        )?;
        self.submit(&request).await
    }

    pub async fn place_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult, ExecutionError> {
        self.place(&OrderIntent::market(symbol, side, quantity)).await
    }

    pub async fn place_limit(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult, ExecutionError> {
        self.place(&OrderIntent::limit(symbol, side, quantity, price))
            .await
    }

    pub async fn place_stop_limit(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult, ExecutionError> {
        self.place(&OrderIntent::stop_limit(
            symbol, side, quantity, price, stop_price,
        ))
        .await
    }

    /// Submit an already validated request
    pub async fn submit(&self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            quantity = %request.quantity,
            price = ?request.price,
            "Placing order"
        );

        // The client order id stays fixed across retries so the exchange can
        // refuse a duplicate if an earlier attempt did land.
        let order = self
            .with_retry("create_order", || self.exchange.create_order(request))
            .await
            .map_err(|e| match e {
                ExecutionError::Unconfirmed { message, .. } => ExecutionError::Unconfirmed {
                    client_order_id: Some(request.client_order_id.clone()),
                    message,
                },
                other => other,
            })?;

        tracing::info!(
            order_id = order.order_id,
            status = ?order.status,
            "Order accepted"
        );

        self.persist(&order).await;
        Ok(order)
    }

    pub async fn submit_oco(&self, request: &OcoRequest) -> Result<OcoOrderResult, ExecutionError> {
        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            take_profit = %request.take_profit_price,
            stop = %request.stop_price,
            "Placing native OCO"
        );

        self.with_retry("create_oco_order", || self.exchange.create_oco_order(request))
            .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderResult, ExecutionError> {
        let symbol = symbol.trim().to_uppercase();
        let order = self
            .with_retry("cancel_order", || self.exchange.cancel_order(&symbol, order_id))
            .await?;

        tracing::info!(symbol = %symbol, order_id, "Order cancelled");
        Ok(order)
    }

    pub async fn order_status(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderResult, ExecutionError> {
        let symbol = symbol.trim().to_uppercase();
        let order = self
            .with_retry("get_order", || self.exchange.get_order(&symbol, order_id))
            .await?;

        tracing::info!(order_id, status = ?order.status, "Retrieved order status");
        Ok(order)
    }

    /// Ping plus an authenticated account query
    pub async fn check_connection(&self) -> Result<(), ExecutionError> {
        self.with_retry("ping", || self.exchange.ping()).await?;
        self.with_retry("account", || self.exchange.account_balance("USDT"))
            .await?;
        tracing::info!("API connection successful");
        Ok(())
    }

    pub async fn balance(&self, asset: &str) -> Result<Balance, ExecutionError> {
        self.with_retry("account", || self.exchange.account_balance(asset))
            .await
    }

    pub async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, ExecutionError> {
        let symbol = symbol.trim().to_uppercase();
        self.with_retry("klines", || self.exchange.klines(&symbol, interval, limit))
            .await
    }

    async fn persist(&self, order: &OrderResult) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_order(order).await {
                tracing::warn!(order_id = order.order_id, "Failed to persist order: {}", e);
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("✓ {} succeeded after {} attempts", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match classify_error(&err) {
                Classification::Transient if attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        operation,
                        err,
                        delay,
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Classification::Transient => {
                    tracing::error!("{} failed after {} attempts: {}", operation, attempt, err);
                    return Err(ExecutionError::Transient {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Classification::Fatal => {
                    tracing::error!("{} hit a fatal exchange error: {}", operation, err);
                    return Err(ExecutionError::Fatal(err.to_string()));
                }
                Classification::Unsupported => return Err(ExecutionError::Unsupported),
                Classification::Unconfirmed => {
                    tracing::error!("{} outcome unknown: {}", operation, err);
                    return Err(ExecutionError::Unconfirmed {
                        client_order_id: None,
                        message: err.to_string(),
                    });
                }
                Classification::Rejected | Classification::Accepted => {
                    tracing::warn!("{} rejected: {}", operation, err);
                    return Err(ExecutionError::Rejected(err.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockExchange;
    use crate::error::ValidationError;
    use crate::persistence::OrderStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn btc() -> Instrument {
        Instrument {
            symbol: "BTCUSDT".to_string(),
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.001),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn gateway(exchange: Arc<MockExchange>) -> ExecutionGateway {
        ExecutionGateway::new(exchange, fast_retry())
    }

    fn api_error(status: u16, code: i64) -> ExchangeError {
        ExchangeError::Api {
            status,
            code,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify::<()>(&Ok(())), Classification::Accepted);
        assert_eq!(
            classify_error(&ExchangeError::Timeout),
            Classification::Transient
        );
        assert_eq!(
            classify_error(&ExchangeError::Network("reset".into())),
            Classification::Transient
        );
        assert_eq!(classify_error(&api_error(429, -1003)), Classification::Transient);
        assert_eq!(classify_error(&api_error(503, 0)), Classification::Transient);
        assert_eq!(classify_error(&api_error(400, -1021)), Classification::Transient);
        assert_eq!(classify_error(&api_error(400, -2010)), Classification::Rejected);
        assert_eq!(classify_error(&api_error(400, -1013)), Classification::Rejected);
        assert_eq!(classify_error(&api_error(401, -2015)), Classification::Fatal);
        assert_eq!(classify_error(&api_error(400, -1022)), Classification::Fatal);
        assert_eq!(
            classify_error(&ExchangeError::Unsupported),
            Classification::Unsupported
        );
        assert_eq!(
            classify_error(&ExchangeError::Decode("missing field orderId".into())),
            Classification::Unconfirmed
        );
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };

        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let second = policy.backoff(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));

        let capped = policy.backoff(10);
        assert!(capped >= Duration::from_millis(300) && capped <= Duration::from_millis(375));
    }

    #[tokio::test]
    async fn test_place_quantizes_before_submitting() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let gw = gateway(exchange.clone());

        let order = gw
            .place_limit("btcusdt", Side::Buy, dec!(0.01234), dec!(25000.019))
            .await
            .unwrap();

        assert_eq!(order.quantity, dec!(0.012));
        assert_eq!(order.price, Some(dec!(25000.01)));
        assert_eq!(exchange.order_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_exchange() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let gw = gateway(exchange.clone());

        let err = gw
            .place_market("BTCUSDT", Side::Buy, dec!(0.0001))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Validation(ValidationError::QuantityTooSmall { .. })
        ));

        let err = gw
            .place_market("DOGEUSDT", Side::Buy, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Validation(ValidationError::UnknownSymbol(_))
        ));

        assert!(exchange.order_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_place_raw_rejects_bad_side() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let gw = gateway(exchange.clone());

        let err = gw
            .place_raw("BTCUSDT", "SHORT", "MARKET", dec!(1), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Validation(ValidationError::InvalidSide(_))
        ));
    }

    #[tokio::test]
    async fn test_place_raw_bad_text_skips_instrument_lookup() {
        // No instrument known yet, so a lookup would have to hit the exchange
        let exchange = Arc::new(MockExchange::new());
        let gw = gateway(exchange.clone());

        let err = gw
            .place_raw("BTCUSDT", "HOLD", "MARKET", dec!(1), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Validation(ValidationError::InvalidSide(_))
        ));

        let err = gw
            .place_raw("BTCUSDT", "BUY", "TRAILING", dec!(1), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Validation(ValidationError::InvalidType(_))
        ));

        assert_eq!(exchange.instrument_lookups(), 0);
        assert!(exchange.order_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_balance() {
        let exchange = Arc::new(MockExchange::new().with_balance(Balance {
            asset: "USDT".to_string(),
            free: dec!(1500),
            locked: dec!(250),
        }));
        let gw = gateway(exchange);

        let balance = gw.balance("USDT").await.unwrap();
        assert_eq!(balance.total(), dec!(1750));

        let empty = gw.balance("ETH").await.unwrap();
        assert_eq!(empty.total(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        exchange.script_orders(vec![
            Err(ExchangeError::Timeout),
            Err(api_error(429, -1003)),
        ]);
        let gw = gateway(exchange.clone());

        let order = gw.place_market("BTCUSDT", Side::Buy, dec!(1)).await;

        assert!(order.is_ok());
        let attempts = exchange.order_attempts();
        assert_eq!(attempts.len(), 3);
        // Same client order id on every retry
        assert!(attempts
            .iter()
            .all(|a| a.client_order_id == attempts[0].client_order_id));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        exchange.script_orders(vec![
            Err(ExchangeError::Timeout),
            Err(ExchangeError::Timeout),
            Err(ExchangeError::Network("connection reset".into())),
            Err(ExchangeError::Timeout),
        ]);
        let gw = gateway(exchange.clone());

        let err = gw
            .place_market("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap_err();

        match err {
            ExecutionError::Transient { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected transient, got {:?}", other),
        }
        assert_eq!(exchange.order_attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        exchange.script_orders(vec![Err(ExchangeError::Api {
            status: 400,
            code: -2010,
            message: "Account has insufficient balance for requested action.".into(),
        })]);
        let gw = gateway(exchange.clone());

        let err = gw
            .place_market("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Rejected(ref m) if m.contains("insufficient balance")));
        assert_eq!(exchange.order_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_unconfirmed_not_rejected() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        exchange.script_orders(vec![Err(ExchangeError::Decode(
            "missing field `orderId`".into(),
        ))]);
        let gw = gateway(exchange.clone());

        let err = gw
            .place_market("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap_err();

        let attempts = exchange.order_attempts();
        assert_eq!(attempts.len(), 1);
        match err {
            ExecutionError::Unconfirmed {
                client_order_id, ..
            } => assert_eq!(client_order_id, Some(attempts[0].client_order_id.clone())),
            other => panic!("expected unconfirmed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        exchange.script_orders(vec![Err(api_error(401, -2015))]);
        let gw = gateway(exchange.clone());

        let err = gw
            .place_market("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(exchange.order_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_instrument_is_cached() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let gw = gateway(exchange.clone());

        gw.place_market("BTCUSDT", Side::Buy, dec!(1)).await.unwrap();
        gw.place_market("BTCUSDT", Side::Sell, dec!(1)).await.unwrap();

        assert_eq!(exchange.instrument_lookups(), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_status() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let gw = gateway(exchange.clone());

        let order = gw
            .place_limit("BTCUSDT", Side::Buy, dec!(1), dec!(20000))
            .await
            .unwrap();
        let cancelled = gw.cancel_order("BTCUSDT", order.order_id).await.unwrap();
        assert_eq!(cancelled.status, crate::models::OrderStatus::Canceled);

        let status = gw.order_status("BTCUSDT", order.order_id).await.unwrap();
        assert_eq!(status.status, crate::models::OrderStatus::Canceled);

        let err = gw.order_status("BTCUSDT", 9999).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_check_connection_fatal() {
        let exchange = Arc::new(MockExchange::new());
        exchange.script_ping(vec![Err(api_error(401, -2014))]);
        let gw = gateway(exchange);

        assert!(gw.check_connection().await.unwrap_err().is_fatal());
    }

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OrderStore for FailingStore {
        async fn save_order(&self, _order: &OrderResult) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("database unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_order() {
        let exchange = Arc::new(MockExchange::new().with_instrument(btc()));
        let store = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        let gw = gateway(exchange).with_store(store.clone());

        let order = gw.place_market("BTCUSDT", Side::Buy, dec!(1)).await;

        assert!(order.is_ok());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
