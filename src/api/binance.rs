use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::Exchange;
use crate::error::ExchangeError;
use crate::execution::to_wire;
use crate::models::{
    Balance, Bar, Instrument, OcoOrderResult, OcoRequest, OrderRequest, OrderResult, OrderStatus,
    OrderType, Side,
};

pub const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";
const DEFAULT_RECV_WINDOW_MS: u64 = 5000;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 1200;

// -1121: the exchange does not list the symbol
const INVALID_SYMBOL_CODE: i64 = -1121;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key pair for signed endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Hex HMAC-SHA256 of the query string, keyed by the secret
    pub fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Network(format!("HMAC init failed: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Binance spot REST client
///
/// Cloneable; all clones share the rate limiter. Failures are reported as
/// raw [`ExchangeError`]s, retry is left to the execution gateway.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    client_order_id: String,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    price: Option<Decimal>,
    orig_qty: Decimal,
    executed_qty: Decimal,
    status: OrderStatus,
    #[serde(rename = "type")]
    order_type: String,
    side: Side,
    #[serde(default)]
    stop_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcoOrderRef {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcoResponse {
    order_list_id: i64,
    orders: Vec<OcoOrderRef>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { min_qty: Decimal, step_size: Decimal },
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, ExchangeError> {
        Self::with_limits(
            base_url,
            credentials,
            DEFAULT_RECV_WINDOW_MS,
            DEFAULT_REQUESTS_PER_MINUTE,
        )
    }

    pub fn with_limits(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
        requests_per_minute: u32,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExchangeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ExchangeError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ExchangeError::Network(format!("Invalid URL: {}", e)))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn public(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let url = self.endpoint(path, params)?;
        self.rate_limiter.until_ready().await;

        tracing::debug!(path, "GET");
        let response = self.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Value, ExchangeError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| ExchangeError::Api {
            status: 401,
            code: -2014,
            message: "API key and secret are required for signed endpoints".to_string(),
        })?;

        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let mut url = self.endpoint(path, &params)?;
        let signature = credentials.sign(url.query().unwrap_or_default())?;
        url.query_pairs_mut().append_pair("signature", &signature);

        self.rate_limiter.until_ready().await;

        tracing::debug!(method = %method, path, "Signed request");
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => (err.code, err.msg),
            Err(_) => (0, body),
        };

        Err(ExchangeError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    fn parse_order(value: Value) -> Result<OrderResult, ExchangeError> {
        let response: OrderResponse = serde_json::from_value(value.clone())?;

        let order_type: OrderType = response
            .order_type
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("unknown order type {}", response.order_type)))?;

        let transact_time = response
            .transact_time
            .or(response.update_time)
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(OrderResult {
            order_id: response.order_id,
            client_order_id: response.client_order_id,
            symbol: response.symbol,
            side: response.side,
            order_type,
            quantity: response.orig_qty,
            executed_quantity: response.executed_qty,
            price: response.price.filter(|p| !p.is_zero()),
            stop_price: response.stop_price.filter(|p| !p.is_zero()),
            status: response.status,
            transact_time,
            raw: value,
        })
    }

    fn parse_instrument(info: ExchangeInfoResponse, symbol: &str) -> Option<Instrument> {
        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))?;

        let mut instrument = Instrument {
            symbol: entry.symbol,
            step_size: Decimal::ZERO,
            tick_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
        };

        for filter in entry.filters {
            match filter {
                SymbolFilter::LotSize { min_qty, step_size } => {
                    instrument.step_size = step_size.normalize();
                    instrument.min_qty = min_qty.normalize();
                }
                SymbolFilter::PriceFilter { tick_size } => {
                    instrument.tick_size = tick_size.normalize();
                }
                SymbolFilter::Other => {}
            }
        }

        Some(instrument)
    }

    fn parse_kline(row: &Value) -> Result<Bar, ExchangeError> {
        let field = |i: usize| -> Result<&Value, ExchangeError> {
            row.get(i)
                .ok_or_else(|| ExchangeError::Decode(format!("kline missing field {}", i)))
        };
        let time = |i: usize| -> Result<DateTime<Utc>, ExchangeError> {
            field(i)?
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not a timestamp", i)))
        };
        let decimal = |i: usize| -> Result<Decimal, ExchangeError> {
            field(i)?
                .as_str()
                .and_then(|s| s.parse::<Decimal>().ok())
                .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not a decimal", i)))
        };

        Ok(Bar {
            open_time: time(0)?,
            open: decimal(1)?,
            high: decimal(2)?,
            low: decimal(3)?,
            close: decimal(4)?,
            volume: decimal(5)?,
            close_time: time(6)?,
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn ping(&self) -> Result<(), ExchangeError> {
        self.public("/api/v3/ping", &[]).await?;
        Ok(())
    }

    async fn account_balance(&self, asset: &str) -> Result<Balance, ExchangeError> {
        let value = self.signed(Method::GET, "/api/v3/account", Vec::new()).await?;
        let account: AccountResponse = serde_json::from_value(value)?;

        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .unwrap_or_else(|| Balance {
                asset: asset.to_uppercase(),
                free: Decimal::ZERO,
                locked: Decimal::ZERO,
            }))
    }

    async fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, ExchangeError> {
        let symbol = symbol.to_uppercase();
        let value = match self
            .public("/api/v3/exchangeInfo", &[("symbol", symbol.clone())])
            .await
        {
            Ok(value) => value,
            Err(ExchangeError::Api { code, .. }) if code == INVALID_SYMBOL_CODE => return Ok(None),
            Err(e) => return Err(e),
        };

        let info: ExchangeInfoResponse = serde_json::from_value(value)?;
        Ok(Self::parse_instrument(info, &symbol))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("type", request.order_type.to_string()),
            ("quantity", to_wire(request.quantity)),
            ("newClientOrderId", request.client_order_id.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        if let Some(price) = request.price {
            params.push(("price", to_wire(price)));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice", to_wire(stop_price)));
        }

        let value = self.signed(Method::POST, "/api/v3/order", params).await?;
        Self::parse_order(value)
    }

    async fn create_oco_order(&self, request: &OcoRequest) -> Result<OcoOrderResult, ExchangeError> {
        let params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("quantity", to_wire(request.quantity)),
            ("price", to_wire(request.take_profit_price)),
            ("stopPrice", to_wire(request.stop_price)),
            ("stopLimitPrice", to_wire(request.stop_limit_price)),
            ("stopLimitTimeInForce", "GTC".to_string()),
        ];

        let value = self.signed(Method::POST, "/api/v3/order/oco", params).await?;
        let response: OcoResponse = serde_json::from_value(value.clone())?;

        Ok(OcoOrderResult {
            order_list_id: response.order_list_id,
            order_ids: response.orders.iter().map(|o| o.order_id).collect(),
            raw: value,
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderResult, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_uppercase()),
            ("orderId", order_id.to_string()),
        ];
        let value = self.signed(Method::DELETE, "/api/v3/order", params).await?;
        Self::parse_order(value)
    }

    async fn get_order(&self, symbol: &str, order_id: u64) -> Result<OrderResult, ExchangeError> {
        let params = vec![
            ("symbol", symbol.to_uppercase()),
            ("orderId", order_id.to_string()),
        ];
        let value = self.signed(Method::GET, "/api/v3/order", params).await?;
        Self::parse_order(value)
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let params = [
            ("symbol", symbol.to_uppercase()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let value = self.public("/api/v3/klines", &params).await?;

        let rows = value
            .as_array()
            .ok_or_else(|| ExchangeError::Decode("klines response is not an array".to_string()))?;
        rows.iter().map(Self::parse_kline).collect()
    }
}
