use crate::models::Bar;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Market shapes for synthetic bar generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Choppy market pulled back towards the starting price
    Sideways,
    /// ±5% swings per bar
    Volatile,
    /// Rally for the first half, then a 25% slide
    Reversal,
}

/// Seeded bar generator for offline backtests
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start_time: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    /// Same seed, same bars
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 30_000.0,
            base_volume: 25.0,
            start_time: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default(),
        }
    }

    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_bars: usize,
        interval_minutes: i64,
    ) -> Vec<Bar> {
        let per_day = 24.0 * 60.0 / interval_minutes.max(1) as f64;
        let mut price = self.base_price;
        let mut bars = Vec::with_capacity(num_bars);

        for i in 0..num_bars {
            price = match scenario {
                MarketScenario::Uptrend => {
                    price + price * 0.02 / per_day + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Downtrend => {
                    price - price * 0.02 / per_day + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price + reversion + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    let next = price + price * self.rng.gen_range(-0.05..0.05);
                    next.max(self.base_price * 0.5)
                }
                MarketScenario::Reversal => {
                    if i < num_bars / 2 {
                        price + price * self.rng.gen_range(-0.005..0.01)
                    } else {
                        let drop_rate = -0.25 / (num_bars as f64 / 2.0);
                        price + price * drop_rate + price * self.rng.gen_range(-0.005..0.005)
                    }
                }
            };

            let open_time = self.start_time + Duration::minutes(i as i64 * interval_minutes);
            bars.push(self.create_bar(price, open_time, interval_minutes));
        }

        bars
    }

    /// OHLCV around a close, open clamped into [low, high]
    fn create_bar(&mut self, close: f64, open_time: DateTime<Utc>, interval_minutes: i64) -> Bar {
        let noise_pct = 0.002;

        let high = close * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = close * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (close * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Bar {
            open_time,
            close_time: open_time + Duration::minutes(interval_minutes) - Duration::milliseconds(1),
            open: to_decimal(open),
            high: to_decimal(high),
            low: to_decimal(low),
            close: to_decimal(close),
            volume: to_decimal(volume),
        }
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_bars() {
        let a = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 100, 60);
        let b = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 100, 60);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bars_are_well_formed() {
        let mut gen = SyntheticDataGenerator::new(42);
        let bars = gen.generate(MarketScenario::Sideways, 200, 5);

        assert_eq!(bars.len(), 200);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].open_time - pair[0].open_time, Duration::minutes(5));
        }
        for bar in &bars {
            assert!(bar.low <= bar.close && bar.close <= bar.high);
            assert!(bar.low <= bar.open && bar.open <= bar.high);
            assert!(bar.volume > Decimal::ZERO);
        }
    }

    #[test]
    fn test_trend_direction() {
        let up = SyntheticDataGenerator::new(1).generate(MarketScenario::Uptrend, 24 * 30, 60);
        let down = SyntheticDataGenerator::new(1).generate(MarketScenario::Downtrend, 24 * 30, 60);

        assert!(up.last().unwrap().close > up[0].close);
        assert!(down.last().unwrap().close < down[0].close);
    }
}
