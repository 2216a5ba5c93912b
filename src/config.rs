use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::api::binance::BINANCE_TESTNET_URL;
use crate::api::ticker_stream::BINANCE_TESTNET_WS_URL;
use crate::execution::RetryPolicy;
use crate::risk::RiskSizer;

/// Runtime settings
///
/// Layered as: built-in defaults, `config/default.toml`, `config/<SPOTBOT_ENV>.toml`,
/// then `SPOTBOT__SECTION__KEY` environment variables. Every file is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub execution: ExecutionSettings,
    pub risk: RiskSettings,
    pub strategy: StrategySettings,
    pub feed: FeedSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_url: BINANCE_TESTNET_URL.to_string(),
            ws_url: BINANCE_TESTNET_WS_URL.to_string(),
            api_key: None,
            api_secret: None,
            recv_window_ms: 5000,
            requests_per_minute: 1200,
        }
    }
}

// Keep the secret out of logs
impl std::fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("rest_url", &self.rest_url)
            .field("ws_url", &self.ws_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("recv_window_ms", &self.recv_window_ms)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 4000,
        }
    }
}

impl ExecutionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Quote currency at risk per trade
    pub max_risk: Decimal,
    pub stop_loss_pct: Decimal,
    pub min_quantity: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_risk: dec!(50),
            stop_loss_pct: dec!(0.01),
            min_quantity: dec!(0.001),
        }
    }
}

impl RiskSettings {
    pub fn sizer(&self) -> RiskSizer {
        RiskSizer::new(self.max_risk, self.stop_loss_pct, self.min_quantity)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            fast_period: 20,
            slow_period: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub symbols: Vec<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "spotbot=info".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env_name = std::env::var("SPOTBOT_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join(env_name)).required(false))
            // SPOTBOT__EXCHANGE__API_KEY, SPOTBOT__FEED__SYMBOLS=BTCUSDT,ETHUSDT, ...
            .add_source(
                Environment::with_prefix("SPOTBOT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("feed.symbols")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
