use crate::backtest::metrics::{BacktestMetrics, TradeAction, TradeRecord};
use crate::models::{Bar, SignalAction};
use crate::strategy::SignalGenerator;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionSide {
    Flat,
    Long,
}

/// Replays bars through a signal generator with a single-unit long/flat position
///
/// Fills happen at the close of the bar that produced the signal. There are
/// no fees or slippage.
#[derive(Debug, Clone, Default)]
pub struct BacktestRunner;

impl BacktestRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run the generator over `bars` in order
    pub fn run<S: SignalGenerator>(
        &self,
        strategy: &mut S,
        symbol: &str,
        bars: &[Bar],
    ) -> Result<BacktestMetrics> {
        let warmup = strategy.warmup_bars();
        if bars.len() < warmup {
            tracing::warn!(
                symbol,
                "Only {} bars for a warmup of {}, no signals will be produced",
                bars.len(),
                warmup
            );
        }

        tracing::info!(
            symbol,
            strategy = strategy.name(),
            "Starting backtest: {} bars, warmup {}",
            bars.len(),
            warmup
        );

        let mut position = PositionSide::Flat;
        let mut trades = Vec::new();

        for bar in bars {
            let Some(signal) = strategy.on_bar_close(symbol, bar) else {
                continue;
            };

            let action = match (signal.action, position) {
                (SignalAction::Long, PositionSide::Flat) => {
                    position = PositionSide::Long;
                    TradeAction::Buy
                }
                (SignalAction::Flat, PositionSide::Long) => {
                    position = PositionSide::Flat;
                    TradeAction::Sell
                }
                _ => continue,
            };

            tracing::debug!(?action, price = %bar.close, time = %bar.close_time, "Simulated fill");
            trades.push(TradeRecord {
                action,
                price: bar.close,
                time: bar.close_time,
            });
        }

        let metrics =
            BacktestMetrics::from_trades(symbol, trades, bars.len(), bars.last().map(|b| b.close));

        tracing::info!(
            symbol,
            "Backtest complete: {} round trips, realized P&L: {}",
            metrics.total_round_trips,
            metrics.realized_pnl
        );

        Ok(metrics)
    }

    /// Run and print the report
    pub fn run_and_report<S: SignalGenerator>(
        &self,
        strategy: &mut S,
        symbol: &str,
        bars: &[Bar],
        scenario_name: &str,
    ) -> Result<BacktestMetrics> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Strategy: {}", strategy.name());
        println!("   Bars: {}", bars.len());

        let metrics = self.run(strategy, symbol, bars)?;
        metrics.print_report();

        Ok(metrics)
    }
}
