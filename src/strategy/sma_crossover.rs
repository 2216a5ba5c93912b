use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

use super::SignalGenerator;
use crate::models::{Bar, Signal, SignalAction};

/// Fixed-capacity window of closes with a running sum
#[derive(Debug, Clone)]
struct RollingWindow {
    values: VecDeque<Decimal>,
    capacity: usize,
    sum: Decimal,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: Decimal::ZERO,
        }
    }

    fn push(&mut self, value: Decimal) {
        if self.values.len() == self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    fn mean(&self) -> Option<Decimal> {
        if !self.is_full() {
            return None;
        }
        Some(self.sum / Decimal::from(self.capacity as u64))
    }
}

#[derive(Debug, Clone)]
struct SignalState {
    fast: RollingWindow,
    slow: RollingWindow,
}

/// Moving-average crossover signal
///
/// Keeps one pair of windows per symbol, created on the symbol's first bar
/// and kept for the life of the engine. Once both windows are full, every
/// bar yields LONG when the fast mean is above the slow mean and FLAT when
/// below; equal means yield nothing.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
    states: HashMap<String, SignalState>,
}

impl SmaCrossover {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period: fast_period.max(1),
            slow_period: slow_period.max(1),
            states: HashMap::new(),
        }
    }

    pub fn fast_period(&self) -> usize {
        self.fast_period
    }

    pub fn slow_period(&self) -> usize {
        self.slow_period
    }

    pub fn tracked_symbols(&self) -> usize {
        self.states.len()
    }
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self::new(20, 50)
    }
}

impl SignalGenerator for SmaCrossover {
    fn on_bar_close(&mut self, symbol: &str, bar: &Bar) -> Option<Signal> {
        let (fast_period, slow_period) = (self.fast_period, self.slow_period);
        let state = self
            .states
            .entry(symbol.to_string())
            .or_insert_with(|| SignalState {
                fast: RollingWindow::new(fast_period),
                slow: RollingWindow::new(slow_period),
            });

        state.fast.push(bar.close);
        state.slow.push(bar.close);

        let fast = state.fast.mean()?;
        let slow = state.slow.mean()?;

        let action = match fast.cmp(&slow) {
            std::cmp::Ordering::Greater => SignalAction::Long,
            std::cmp::Ordering::Less => SignalAction::Flat,
            std::cmp::Ordering::Equal => return None,
        };

        tracing::debug!(symbol, fast = %fast, slow = %slow, ?action, "Crossover signal");

        Some(Signal {
            symbol: symbol.to_string(),
            action,
        })
    }

    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn warmup_bars(&self) -> usize {
        self.fast_period.max(self.slow_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(close: i64) -> Bar {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        Bar {
            open_time: t,
            close_time: t,
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: Decimal::ONE,
        }
    }

    fn actions(engine: &mut SmaCrossover, symbol: &str, closes: &[i64]) -> Vec<Option<SignalAction>> {
        closes
            .iter()
            .map(|c| engine.on_bar_close(symbol, &bar(*c)).map(|s| s.action))
            .collect()
    }

    #[test]
    fn test_signal_starts_once_windows_fill() {
        let mut engine = SmaCrossover::new(2, 3);

        let out = actions(&mut engine, "BTCUSDT", &[1, 2, 3, 4, 5]);

        assert_eq!(
            out,
            vec![
                None,
                None,
                Some(SignalAction::Long),
                Some(SignalAction::Long),
                Some(SignalAction::Long)
            ]
        );
        assert_eq!(engine.warmup_bars(), 3);
    }

    #[test]
    fn test_falling_prices_go_flat() {
        let mut engine = SmaCrossover::new(2, 3);
        let out = actions(&mut engine, "BTCUSDT", &[5, 4, 3, 2]);
        assert_eq!(out[2], Some(SignalAction::Flat));
        assert_eq!(out[3], Some(SignalAction::Flat));
    }

    #[test]
    fn test_constant_prices_never_signal() {
        let mut engine = SmaCrossover::new(3, 7);
        let out = actions(&mut engine, "ETHUSDT", &[100; 50]);
        assert!(out.iter().all(|a| a.is_none()));
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut engine = SmaCrossover::new(2, 3);

        actions(&mut engine, "BTCUSDT", &[1, 2]);
        // ETH has only one bar of history
        assert_eq!(engine.on_bar_close("ETHUSDT", &bar(10)), None);
        assert_eq!(
            engine.on_bar_close("BTCUSDT", &bar(3)).map(|s| s.action),
            Some(SignalAction::Long)
        );
        assert_eq!(engine.tracked_symbols(), 2);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = RollingWindow::new(3);
        for v in 1..=10 {
            window.push(Decimal::from(v));
            assert!(window.values.len() <= 3);
        }
        assert_eq!(window.mean(), Some(Decimal::from(9)));
    }
}
