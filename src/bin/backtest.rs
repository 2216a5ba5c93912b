use spotbot::backtest::{BacktestMetrics, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use spotbot::config::Settings;
use spotbot::strategy::SmaCrossover;
use spotbot::Result;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(settings.logging.filter.as_str())
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║           SPOTBOT CROSSOVER BACKTEST SUITE            ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!(
        "   SMA {} / {} on hourly synthetic bars",
        settings.strategy.fast_period, settings.strategy.slow_period
    );

    let runner = BacktestRunner::new();

    let scenarios = [
        (MarketScenario::Uptrend, "📈 Uptrend (+2% daily)"),
        (MarketScenario::Downtrend, "📉 Downtrend (-2% daily)"),
        (MarketScenario::Sideways, "↔️  Sideways (mean-reverting)"),
        (MarketScenario::Volatile, "⚡ Volatile (±5% swings)"),
        (MarketScenario::Reversal, "🔄 Rally then 25% slide"),
    ];

    let mut all_metrics = Vec::new();

    for (scenario, name) in scenarios {
        let bars = SyntheticDataGenerator::new(42).generate(scenario, 24 * 60, 60);
        let mut strategy =
            SmaCrossover::new(settings.strategy.fast_period, settings.strategy.slow_period);

        match runner.run_and_report(&mut strategy, "SYNTH", &bars, name) {
            Ok(metrics) => all_metrics.push((name.to_string(), metrics)),
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", name, e),
        }
    }

    print_summary_comparison(&all_metrics);

    Ok(())
}

fn print_summary_comparison(results: &[(String, BacktestMetrics)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<32} {:>14} {:>8} {:>8}",
        "Scenario", "Realized P&L", "Trips", "Win%"
    );
    println!("{}", "─".repeat(66));

    for (name, metrics) in results {
        println!(
            "{:<32} {:>14} {:>8} {:>8.1}",
            name,
            metrics.realized_pnl.round_dp(2),
            metrics.total_round_trips,
            metrics.win_rate
        );
    }

    if let Some((best_name, best)) = results.iter().max_by_key(|(_, m)| m.realized_pnl) {
        println!("\n🏆 Best Scenario: {} ({})", best_name, best.realized_pnl.round_dp(2));
    }
    if let Some((worst_name, worst)) = results.iter().min_by_key(|(_, m)| m.realized_pnl) {
        println!("⚠️  Worst Scenario: {} ({})", worst_name, worst.realized_pnl.round_dp(2));
    }

    let total_trips: usize = results.iter().map(|(_, m)| m.total_round_trips).sum();
    println!("\n📊 Round trips across all scenarios: {}", total_trips);
    println!("\n═══════════════════════════════════════════════════════\n");
}
