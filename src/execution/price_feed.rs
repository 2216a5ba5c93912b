use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::api::TickSource;
use crate::error::ExchangeError;
use crate::models::PriceTick;

/// Latest known price per symbol
///
/// Cloning shares the same map. Locks are held for a single read or
/// update, never across an await.
#[derive(Clone, Default)]
pub struct PriceBook {
    prices: Arc<RwLock<HashMap<String, PriceTick>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tick unless a newer one for the same symbol is already held
    pub(crate) fn update(&self, tick: PriceTick) -> bool {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());

        match prices.get(&tick.symbol) {
            Some(current) if current.timestamp > tick.timestamp => false,
            _ => {
                prices.insert(tick.symbol.clone(), tick);
                true
            }
        }
    }

    pub fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.latest(symbol).map(|tick| tick.price)
    }

    pub fn latest(&self, symbol: &str) -> Option<PriceTick> {
        self.prices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol.to_uppercase())
            .cloned()
    }
}

#[derive(Debug, Deserialize)]
struct TickerMessage {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    price: Decimal,
    #[serde(rename = "E")]
    event_time: i64,
}

/// Parse a 24h ticker event, bare or wrapped in a combined-stream envelope
pub fn parse_ticker_message(text: &str) -> Result<PriceTick, ExchangeError> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    if let Some(data) = value.get_mut("data") {
        value = data.take();
    }

    let message: TickerMessage = serde_json::from_value(value)?;
    if message.price <= Decimal::ZERO {
        return Err(ExchangeError::Decode(format!(
            "non-positive price {} for {}",
            message.price, message.symbol
        )));
    }

    let timestamp = DateTime::<Utc>::from_timestamp_millis(message.event_time).ok_or_else(|| {
        ExchangeError::Decode(format!("invalid event time {}", message.event_time))
    })?;

    Ok(PriceTick {
        symbol: message.symbol.to_uppercase(),
        price: message.price,
        timestamp,
    })
}

/// Background ingestion of live ticks into a [`PriceBook`]
///
/// The ingestion task is the only writer. Order placement never waits on it.
pub struct PriceFeed {
    book: PriceBook,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PriceFeed {
    pub fn new() -> Self {
        Self {
            book: PriceBook::new(),
            task: Mutex::new(None),
        }
    }

    /// Subscribe to the given symbols and start the ingestion task
    pub async fn start(
        &self,
        source: Arc<dyn TickSource>,
        symbols: &[String],
    ) -> Result<(), ExchangeError> {
        self.stop();

        let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        let mut rx = source.subscribe(&symbols).await?;
        let book = self.book.clone();

        tracing::info!(symbols = ?symbols, "Starting price feed");

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match parse_ticker_message(&message) {
                    Ok(tick) => {
                        tracing::trace!(symbol = %tick.symbol, price = %tick.price, "Tick");
                        book.update(tick);
                    }
                    Err(e) => {
                        tracing::warn!("Dropping malformed tick: {} ({})", e, message);
                    }
                }
            }
            tracing::info!("Tick stream ended, price feed stopped");
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the ingestion task. Last known prices stay readable.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.book.get_price(symbol)
    }

    pub fn latest(&self, symbol: &str) -> Option<PriceTick> {
        self.book.latest(symbol)
    }

    /// Read handle for other components
    pub fn book(&self) -> PriceBook {
        self.book.clone()
    }
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PriceFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSource {
        rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    }

    impl ChannelSource {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(Self {
                rx: Mutex::new(Some(rx)),
            });
            (source, tx)
        }
    }

    #[async_trait]
    impl TickSource for ChannelSource {
        async fn subscribe(
            &self,
            _symbols: &[String],
        ) -> Result<mpsc::UnboundedReceiver<String>, ExchangeError> {
            self.rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ExchangeError::Network("already subscribed".into()))
        }
    }

    fn ticker(symbol: &str, price: &str, event_time: i64) -> String {
        format!(
            r#"{{"e":"24hrTicker","E":{},"s":"{}","c":"{}","o":"1.0"}}"#,
            event_time, symbol, price
        )
    }

    async fn wait_for_price(feed: &PriceFeed, symbol: &str, expected: Decimal) {
        for _ in 0..200 {
            if feed.get_price(symbol) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("price for {} never reached {}", symbol, expected);
    }

    #[test]
    fn test_parse_ticker_message() {
        let tick = parse_ticker_message(&ticker("BTCUSDT", "27123.45000000", 1_700_000_000_000))
            .unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.price, dec!(27123.45));
        assert_eq!(
            tick.timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
    }

    #[test]
    fn test_parse_combined_stream_envelope() {
        let wrapped = format!(
            r#"{{"stream":"ethusdt@ticker","data":{}}}"#,
            ticker("ETHUSDT", "1800.5", 1_700_000_000_000)
        );
        let tick = parse_ticker_message(&wrapped).unwrap();
        assert_eq!(tick.symbol, "ETHUSDT");
        assert_eq!(tick.price, dec!(1800.5));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_ticker_message("not json").is_err());
        assert!(parse_ticker_message(r#"{"s":"BTCUSDT","E":1}"#).is_err());
        assert!(parse_ticker_message(r#"{"s":"BTCUSDT","c":"abc","E":1}"#).is_err());
        assert!(parse_ticker_message(&ticker("BTCUSDT", "0", 1)).is_err());
    }

    #[test]
    fn test_older_tick_does_not_replace_newer() {
        let book = PriceBook::new();
        let newer = PriceTick {
            symbol: "BTCUSDT".into(),
            price: dec!(2),
            timestamp: Utc.timestamp_opt(200, 0).unwrap(),
        };
        let older = PriceTick {
            price: dec!(1),
            timestamp: Utc.timestamp_opt(100, 0).unwrap(),
            ..newer.clone()
        };

        assert!(book.update(newer));
        assert!(!book.update(older));
        assert_eq!(book.get_price("btcusdt"), Some(dec!(2)));
        assert_eq!(book.get_price("ETHUSDT"), None);
    }

    #[tokio::test]
    async fn test_feed_ingests_and_drops_malformed() {
        tracing_subscriber::fmt()
            .with_env_filter("spotbot=debug")
            .try_init()
            .ok();

        let (source, tx) = ChannelSource::new();
        let feed = PriceFeed::new();
        feed.start(source, &["btcusdt".to_string()]).await.unwrap();
        assert!(feed.is_running());

        tx.send("garbage".to_string()).unwrap();
        tx.send(r#"{"s":"BTCUSDT"}"#.to_string()).unwrap();
        tx.send(ticker("BTCUSDT", "100.5", 1_000)).unwrap();
        wait_for_price(&feed, "BTCUSDT", dec!(100.5)).await;

        // Still alive after the malformed messages
        tx.send(ticker("BTCUSDT", "101", 2_000)).unwrap();
        wait_for_price(&feed, "BTCUSDT", dec!(101)).await;

        feed.stop();
        assert!(!feed.is_running());
        assert_eq!(feed.get_price("BTCUSDT"), Some(dec!(101)));
    }

    #[test]
    fn test_concurrent_writers_and_readers_never_tear() {
        let book = PriceBook::new();
        let symbols = ["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT"];

        std::thread::scope(|scope| {
            for symbol in symbols {
                let book = book.clone();
                scope.spawn(move || {
                    for n in 1..=2_000i64 {
                        book.update(PriceTick {
                            symbol: symbol.to_string(),
                            price: Decimal::from(n),
                            timestamp: Utc.timestamp_opt(n, 0).unwrap(),
                        });
                    }
                });
            }

            for _ in 0..4 {
                let book = book.clone();
                scope.spawn(move || {
                    for _ in 0..2_000 {
                        for symbol in symbols {
                            if let Some(tick) = book.latest(symbol) {
                                // Price and timestamp were written together
                                assert_eq!(tick.symbol, symbol);
                                assert_eq!(tick.price, Decimal::from(tick.timestamp.timestamp()));
                            }
                        }
                    }
                });
            }
        });

        for symbol in symbols {
            assert_eq!(book.get_price(symbol), Some(dec!(2000)));
        }
    }
}
