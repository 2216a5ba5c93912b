use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// One simulated fill at a bar close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub action: TradeAction,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// A BUY matched with the SELL that closed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: Decimal,
}

impl RoundTrip {
    pub fn holding_period_minutes(&self) -> i64 {
        (self.exit_time - self.entry_time).num_minutes()
    }
}

/// Backtest results for a single-unit long/flat position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub symbol: String,
    pub bars_processed: usize,

    // Realized P&L over closed round trips
    pub realized_pnl: Decimal,
    // Mark-to-market of a position still open at the last close
    pub unrealized_pnl: Decimal,
    pub open_position: bool,

    pub total_round_trips: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub max_drawdown: Decimal,

    pub trades: Vec<TradeRecord>,
    pub round_trips: Vec<RoundTrip>,
}

impl BacktestMetrics {
    /// Pair each BUY with the next SELL and summarise
    pub fn from_trades(
        symbol: &str,
        trades: Vec<TradeRecord>,
        bars_processed: usize,
        last_close: Option<Decimal>,
    ) -> Self {
        let mut round_trips = Vec::new();
        let mut entry: Option<&TradeRecord> = None;

        for trade in &trades {
            match (trade.action, entry) {
                (TradeAction::Buy, None) => entry = Some(trade),
                (TradeAction::Sell, Some(buy)) => {
                    round_trips.push(RoundTrip {
                        entry_price: buy.price,
                        exit_price: trade.price,
                        entry_time: buy.time,
                        exit_time: trade.time,
                        pnl: trade.price - buy.price,
                    });
                    entry = None;
                }
                // The runner never produces these
                _ => {}
            }
        }

        let unrealized_pnl = match (entry, last_close) {
            (Some(buy), Some(close)) => close - buy.price,
            _ => Decimal::ZERO,
        };
        let open_position = entry.is_some();

        let realized_pnl: Decimal = round_trips.iter().map(|r| r.pnl).sum();
        let winning_trades = round_trips.iter().filter(|r| r.pnl > Decimal::ZERO).count();
        let losing_trades = round_trips.len() - winning_trades;
        let win_rate = if round_trips.is_empty() {
            0.0
        } else {
            winning_trades as f64 / round_trips.len() as f64 * 100.0
        };

        let largest_win = round_trips
            .iter()
            .map(|r| r.pnl)
            .filter(|p| *p > Decimal::ZERO)
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_loss = round_trips
            .iter()
            .map(|r| r.pnl)
            .filter(|p| *p <= Decimal::ZERO)
            .min()
            .unwrap_or(Decimal::ZERO);

        Self {
            symbol: symbol.to_string(),
            bars_processed,
            realized_pnl,
            unrealized_pnl,
            open_position,
            total_round_trips: round_trips.len(),
            winning_trades,
            losing_trades,
            win_rate,
            largest_win,
            largest_loss,
            max_drawdown: Self::calculate_drawdown(&round_trips),
            trades,
            round_trips,
        }
    }

    /// Largest peak-to-trough fall of cumulative realized P&L
    fn calculate_drawdown(round_trips: &[RoundTrip]) -> Decimal {
        let mut peak = Decimal::ZERO;
        let mut cumulative = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;

        for trip in round_trips {
            cumulative += trip.pnl;
            peak = peak.max(cumulative);
            max_dd = max_dd.max(peak - cumulative);
        }

        max_dd
    }

    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 {} over {} bars", self.symbol, self.bars_processed);
        println!("  Realized P&L:          {}", self.realized_pnl);
        if self.open_position {
            println!("  Open position P&L:     {}", self.unrealized_pnl);
        }

        println!("\n📈 TRADE STATISTICS");
        println!("  Fills:                 {}", self.trades.len());
        println!("  Round trips:           {}", self.total_round_trips);
        println!(
            "  Winning:               {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing:                {}", self.losing_trades);

        if self.total_round_trips > 0 {
            println!("\n💰 WIN/LOSS");
            println!("  Largest win:           {}", self.largest_win);
            println!("  Largest loss:          {}", self.largest_loss);
            println!("  Max drawdown:          {}", self.max_drawdown);

            let avg_hold = self
                .round_trips
                .iter()
                .map(|r| r.holding_period_minutes())
                .sum::<i64>() as f64
                / self.total_round_trips as f64;
            println!("  Avg holding period:    {:.1} hours", avg_hold / 60.0);
        }

        if let Some(pnl) = self.realized_pnl.to_f64() {
            println!("\n  Net result:            {:+.4}", pnl);
        }
        println!("\n═════════════════════════════════════════════════════════\n");
    }
}
