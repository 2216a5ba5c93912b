use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use spotbot::api::{BinanceClient, BinanceTickerStream, Credentials};
use spotbot::backtest::BacktestRunner;
use spotbot::config::Settings;
use spotbot::execution::{ExecutionGateway, PriceFeed};
use spotbot::models::{Bar, OrderResult, Side};
use spotbot::persistence::{PostgresOrderStore, RedisBarCache};
use spotbot::strategy::{BatchReport, GridBuilder, OcoCoordinator, SmaCrossover, TwapPlan, TwapScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spotbot")]
#[command(version)]
#[command(about = "Spot order execution and strategy engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding default.toml and <SPOTBOT_ENV>.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Check connectivity and credentials
    Ping,
    /// Show free and locked balance for an asset
    Balance {
        #[arg(default_value = "USDT")]
        asset: String,
    },
    /// Place a market order
    Market {
        symbol: String,
        side: Side,
        quantity: Decimal,
    },
    /// Place a GTC limit order
    Limit {
        symbol: String,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    },
    /// Place a stop-limit order
    StopLimit {
        symbol: String,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        stop_price: Decimal,
    },
    /// Query an order
    Status { symbol: String, order_id: u64 },
    /// Cancel an order
    Cancel { symbol: String, order_id: u64 },
    /// Place a take-profit / stop-loss pair for an open position
    Oco {
        symbol: String,
        /// Side of the position being protected; the exits take the opposite side
        entry_side: Side,
        quantity: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    },
    /// Split an order into market slices over time (Ctrl+C stops between slices)
    Twap {
        symbol: String,
        side: Side,
        quantity: Decimal,
        /// Total run time in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,
        #[arg(short, long, default_value = "4")]
        slices: u32,
        #[arg(long, default_value = "0")]
        min_slice: Decimal,
    },
    /// Ladder limit orders away from a base price
    Grid {
        symbol: String,
        side: Side,
        base_price: Decimal,
        quantity: Decimal,
        #[arg(short, long, default_value = "5")]
        levels: u32,
        /// Fractional spacing per level, 0.01 = 1%
        #[arg(long, default_value = "0.01")]
        step: Decimal,
    },
    /// Stream live prices until Ctrl+C
    Prices {
        /// Symbols to follow (defaults to feed.symbols)
        symbols: Vec<String>,
        #[arg(short, long, default_value = "5")]
        every: u64,
    },
    /// Risk-based position size for an entry price
    Size { price: Decimal },
    /// Run the SMA crossover over exchange klines
    Backtest {
        symbol: String,
        #[arg(short, long, default_value = "1h")]
        interval: String,
        #[arg(short, long, default_value = "500")]
        limit: u32,
        #[arg(long)]
        fast: Option<usize>,
        #[arg(long)]
        slow: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config_dir).context("Failed to load settings")?;

    setup_logging(&settings);
    tracing::debug!(?settings, "Loaded settings");

    match cli.command {
        Commands::Size { price } => {
            let sizer = settings.risk.sizer();
            println!("Quantity:   {}", sizer.size(price));
            println!("Stop price: {}", sizer.stop_price(price));
            Ok(())
        }
        Commands::Prices { symbols, every } => {
            let symbols = if symbols.is_empty() {
                settings.feed.symbols.clone()
            } else {
                symbols
            };
            run_price_feed(&settings, &symbols, Duration::from_secs(every.max(1))).await
        }
        command => {
            let gateway = Arc::new(create_gateway(&settings).await?);
            run_order_command(&settings, gateway, command).await
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn create_gateway(settings: &Settings) -> Result<ExecutionGateway> {
    let exchange = &settings.exchange;
    let credentials = match (&exchange.api_key, &exchange.api_secret) {
        (Some(key), Some(secret)) => Some(Credentials::new(key, secret)),
        _ => {
            tracing::warn!("No API credentials configured, signed endpoints will be refused");
            None
        }
    };

    let client = BinanceClient::with_limits(
        &exchange.rest_url,
        credentials,
        exchange.recv_window_ms,
        exchange.requests_per_minute,
    )?;

    let mut gateway =
        ExecutionGateway::new(Arc::new(client), settings.execution.retry_policy());

    if let Some(database_url) = &settings.storage.database_url {
        match PostgresOrderStore::new(database_url).await {
            Ok(store) => {
                tracing::info!("Postgres order persistence enabled");
                gateway = gateway.with_store(Arc::new(store));
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Postgres ({}), continuing without persistence",
                    e
                );
            }
        }
    }

    Ok(gateway)
}

// ============================================================================
// Commands
// ============================================================================

async fn run_order_command(
    settings: &Settings,
    gateway: Arc<ExecutionGateway>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Ping => {
            gateway.check_connection().await?;
            println!("✓ Exchange reachable, credentials accepted");
        }
        Commands::Balance { asset } => {
            let balance = gateway.balance(&asset).await?;
            println!(
                "{}: free {} locked {} (total {})",
                balance.asset,
                balance.free,
                balance.locked,
                balance.total()
            );
        }
        Commands::Market {
            symbol,
            side,
            quantity,
        } => {
            let order = gateway.place_market(&symbol, side, quantity).await?;
            print_order(&order);
        }
        Commands::Limit {
            symbol,
            side,
            quantity,
            price,
        } => {
            let order = gateway.place_limit(&symbol, side, quantity, price).await?;
            print_order(&order);
        }
        Commands::StopLimit {
            symbol,
            side,
            quantity,
            price,
            stop_price,
        } => {
            let order = gateway
                .place_stop_limit(&symbol, side, quantity, price, stop_price)
                .await?;
            print_order(&order);
        }
        Commands::Status { symbol, order_id } => {
            print_order(&gateway.order_status(&symbol, order_id).await?);
        }
        Commands::Cancel { symbol, order_id } => {
            print_order(&gateway.cancel_order(&symbol, order_id).await?);
        }
        Commands::Oco {
            symbol,
            entry_side,
            quantity,
            take_profit,
            stop_loss,
        } => {
            let report = OcoCoordinator::new(gateway)
                .submit(&symbol, entry_side, quantity, take_profit, stop_loss)
                .await?;

            println!("OCO {:?} via {:?} orders: {:?}", report.status(), report.mode, report.order_ids());
            if let Some(reason) = &report.fallback_reason {
                println!("  Native OCO unavailable: {}", reason);
            }
            for (name, leg) in [("take-profit", &report.take_profit), ("stop-loss", &report.stop_loss)] {
                println!("  {}: {:?}", name, leg);
            }
        }
        Commands::Twap {
            symbol,
            side,
            quantity,
            duration,
            slices,
            min_slice,
        } => {
            let plan = TwapPlan::new(
                &symbol,
                side,
                quantity,
                Duration::from_secs(duration),
                slices,
                min_slice,
            )?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Ctrl+C received, stopping TWAP at the next slice boundary");
                    let _ = cancel_tx.send(true);
                }
            });

            let report = TwapScheduler::new(gateway)
                .execute_with_cancel(&plan, cancel_rx)
                .await;
            print_batch("TWAP", &report);
        }
        Commands::Grid {
            symbol,
            side,
            base_price,
            quantity,
            levels,
            step,
        } => {
            let report = GridBuilder::new(gateway)
                .build(&symbol, base_price, levels, step, quantity, side)
                .await?;
            print_batch("Grid", &report);
        }
        Commands::Backtest {
            symbol,
            interval,
            limit,
            fast,
            slow,
        } => {
            let bars = load_bars(settings, &gateway, &symbol, &interval, limit).await?;
            let mut strategy = SmaCrossover::new(
                fast.unwrap_or(settings.strategy.fast_period),
                slow.unwrap_or(settings.strategy.slow_period),
            );

            BacktestRunner::new()
                .run_and_report(
                    &mut strategy,
                    &symbol.to_uppercase(),
                    &bars,
                    &format!("{} {}", symbol.to_uppercase(), interval),
                )
                .map_err(|e| anyhow!(e))?;
        }
        Commands::Size { .. } | Commands::Prices { .. } => {}
    }

    Ok(())
}

/// Klines from the Redis cache when it holds enough, otherwise from the exchange
async fn load_bars(
    settings: &Settings,
    gateway: &ExecutionGateway,
    symbol: &str,
    interval: &str,
    limit: u32,
) -> Result<Vec<Bar>> {
    let mut cache = match &settings.storage.redis_url {
        Some(url) => match RedisBarCache::new(url).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), fetching bars directly", e);
                None
            }
        },
        None => None,
    };

    if let Some(cache) = cache.as_mut() {
        match cache.load_bars(symbol, interval, limit as usize).await {
            Ok(bars) if bars.len() >= limit as usize => {
                tracing::info!("Loaded {} bars from cache", bars.len());
                return Ok(bars);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read bar cache: {}", e),
        }
    }

    let bars = gateway.klines(symbol, interval, limit).await?;
    tracing::info!("Fetched {} bars from exchange", bars.len());

    if let Some(cache) = cache.as_mut() {
        if let Err(e) = cache.save_bars(symbol, interval, &bars).await {
            tracing::warn!("Failed to write bar cache: {}", e);
        }
    }

    Ok(bars)
}

async fn run_price_feed(settings: &Settings, symbols: &[String], every: Duration) -> Result<()> {
    let source = Arc::new(BinanceTickerStream::new(&settings.exchange.ws_url));
    let feed = PriceFeed::new();
    feed.start(source, symbols).await?;

    let mut ticker = tokio::time::interval(every);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for symbol in symbols {
                    match feed.latest(symbol) {
                        Some(tick) => println!("{:<12} {:>16} @ {}", tick.symbol, tick.price, tick.timestamp),
                        None => println!("{:<12} {:>16}", symbol.to_uppercase(), "-"),
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down price feed");
                feed.stop();
                return Ok(());
            }
        }
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_order(order: &OrderResult) {
    println!(
        "#{} {} {} {} qty {} filled {} price {} [{}]",
        order.order_id,
        order.symbol,
        order.side,
        order.order_type,
        order.quantity,
        order.executed_quantity,
        order
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "market".to_string()),
        order.status
    );
}

fn print_batch(name: &str, report: &BatchReport<OrderResult>) {
    println!("{} {:?}: {} orders placed", name, report.status(), report.completed.len());
    for order in &report.completed {
        print_order(order);
    }
    if let Some(failure) = &report.failure {
        println!("✗ step {} failed: {}", failure.step, failure.error);
    }
}
