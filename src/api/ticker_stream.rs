use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::TickSource;
use crate::error::ExchangeError;

pub const BINANCE_TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision/ws";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Binance `<symbol>@ticker` WebSocket
///
/// Each subscription runs its own connection task that reconnects with
/// backoff until the receiving side is dropped.
#[derive(Debug, Clone)]
pub struct BinanceTickerStream {
    ws_url: String,
    reconnect_delay: Duration,
}

enum StreamEnd {
    /// Server closed or the stream ran dry; reconnect
    Closed,
    /// Nobody is listening any more
    ReceiverDropped,
}

impl BinanceTickerStream {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    pub fn stream_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect();
        format!("{}/{}", self.ws_url, streams.join("/"))
    }

    async fn run(url: String, base_delay: Duration, tx: mpsc::UnboundedSender<String>) {
        let mut attempt: u32 = 0;

        loop {
            match Self::connect_and_forward(&url, &tx).await {
                Ok(StreamEnd::ReceiverDropped) => {
                    tracing::info!("Ticker receiver dropped, closing stream");
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    tracing::info!("Ticker stream closed by server");
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    tracing::error!("Ticker stream error (attempt {}): {}", attempt, e);
                }
            }

            let delay = (base_delay * attempt.clamp(1, 10)).min(MAX_RECONNECT_DELAY);
            let jitter_ms = delay.as_millis() as u64 / 4;
            let delay = delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));

            tracing::info!("Reconnecting ticker stream in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tx.closed() => return,
            }
        }
    }

    async fn connect_and_forward(
        url: &str,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Result<StreamEnd, ExchangeError> {
        tracing::info!("Connecting to ticker stream: {}", url);

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| ExchangeError::Timeout)?
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        tracing::info!("Connected to ticker stream");

        let (mut write, mut read) = ws_stream.split();
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(text).is_err() {
                            return Ok(StreamEnd::ReceiverDropped);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| ExchangeError::Network(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(StreamEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ExchangeError::Network(e.to_string())),
                },
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| ExchangeError::Network(e.to_string()))?;
                }
                _ = tx.closed() => return Ok(StreamEnd::ReceiverDropped),
            }
        }
    }
}

impl Default for BinanceTickerStream {
    fn default() -> Self {
        Self::new(BINANCE_TESTNET_WS_URL)
    }
}

#[async_trait]
impl TickSource for BinanceTickerStream {
    async fn subscribe(
        &self,
        symbols: &[String],
    ) -> Result<mpsc::UnboundedReceiver<String>, ExchangeError> {
        if symbols.is_empty() {
            return Err(ExchangeError::Network("no symbols to subscribe".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run(self.stream_url(symbols), self.reconnect_delay, tx));
        Ok(rx)
    }
}
