use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::models::Bar;
use crate::Result;

/// Redis cache of historical bars
///
/// One sorted set per symbol and interval, scored by open time in
/// milliseconds, so a re-fetched bar replaces the cached one.
pub struct RedisBarCache {
    conn: ConnectionManager,
}

impl RedisBarCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis bar cache");

        Ok(Self { conn })
    }

    fn key(symbol: &str, interval: &str) -> String {
        format!("bars:{}:{}", symbol.to_uppercase(), interval)
    }

    pub async fn save_bars(&mut self, symbol: &str, interval: &str, bars: &[Bar]) -> Result<()> {
        let key = Self::key(symbol, interval);

        for bar in bars {
            let score = bar.open_time.timestamp_millis();
            let value = serde_json::to_string(bar)?;

            self.conn
                .zrembyscore::<_, _, _, ()>(&key, score, score)
                .await?;
            self.conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Cached {} bars for {} {}", bars.len(), symbol, interval);

        Ok(())
    }

    /// Most recent `limit` bars, oldest first
    pub async fn load_bars(&mut self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = Self::key(symbol, interval);
        let start = -(limit.min(isize::MAX as usize) as isize);
        let values: Vec<String> = self.conn.zrange(&key, start, -1).await?;

        let bars = values
            .iter()
            .map(|v| serde_json::from_str(v))
            .collect::<std::result::Result<Vec<Bar>, _>>()?;

        tracing::info!("Loaded {} cached bars for {} {}", bars.len(), symbol, interval);

        Ok(bars)
    }

    pub async fn count_bars(&mut self, symbol: &str, interval: &str) -> Result<usize> {
        let count: usize = self.conn.zcard(Self::key(symbol, interval)).await?;
        Ok(count)
    }

    pub async fn clear(&mut self, symbol: &str, interval: &str) -> Result<()> {
        self.conn.del::<_, ()>(Self::key(symbol, interval)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn bar(hour: i64, close: i64) -> Bar {
        let open_time = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::hours(hour);
        Bar {
            open_time,
            close_time: open_time + ChronoDuration::hours(1),
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: Decimal::from(10),
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(RedisBarCache::key("btcusdt", "1h"), "bars:BTCUSDT:1h");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        let result = RedisBarCache::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_and_load_bars() {
        let mut cache = RedisBarCache::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        cache.clear("TESTBARS", "1h").await.unwrap();

        cache
            .save_bars("TESTBARS", "1h", &[bar(0, 100), bar(1, 101), bar(2, 102)])
            .await
            .unwrap();
        // Re-fetched bar replaces the cached one
        cache.save_bars("TESTBARS", "1h", &[bar(2, 105)]).await.unwrap();

        assert_eq!(cache.count_bars("TESTBARS", "1h").await.unwrap(), 3);

        let loaded = cache.load_bars("TESTBARS", "1h", 2).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].close, Decimal::from(101));
        assert_eq!(loaded[1].close, Decimal::from(105));

        cache.clear("TESTBARS", "1h").await.unwrap();
    }
}
