//! Strategy Lab: backtest trading strategies against historical candles
//!
//! Usage:
//!   strategy-lab strategies list                         Show available strategies
//!   strategy-lab run --candles btc.json --strategy macd  Backtest one strategy
//!   strategy-lab compare --candles btc.json --strategies rsi,macd,kdj

mod feed;
mod store;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    run_backtest, BacktestConfig, BacktestResult, Candle, ReloadOutcome, ResultStore,
    StrategyParams, StrategyRegistry, StrategyTable, Timeframe,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::store::JsonFileStore;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "strategy-lab")]
#[command(about = "Backtest trading strategies against historical candles", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory of external strategy definitions (overrides STRATEGY_EXTERNAL_DIR)
    #[arg(long, global = true)]
    strategies_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and reload the strategy registry
    Strategies {
        #[command(subcommand)]
        action: StrategyCommands,
    },
    /// Backtest a single strategy
    Run {
        #[command(flatten)]
        market: MarketArgs,
        /// Strategy id
        #[arg(long, default_value = "dual_ma")]
        strategy: String,
        /// Strategy parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Backtest several strategies on the same candles and rank them
    Compare {
        #[command(flatten)]
        market: MarketArgs,
        /// Strategy ids (comma-separated); all strategies when omitted
        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,
    },
}

#[derive(Subcommand)]
enum StrategyCommands {
    /// List strategies with their parameter schemas
    List {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the source text behind a strategy id
    Source { id: String },
    /// Re-read the external strategy directory and report what changed since startup
    Reload,
}

#[derive(Args, Clone)]
struct MarketArgs {
    /// Candle file (JSON)
    #[arg(long)]
    candles: PathBuf,
    #[arg(long, default_value = "BTC-USDT")]
    symbol: String,
    #[arg(long, default_value = "1H")]
    timeframe: Timeframe,
    /// Trailing window of the candle file to use, in days (0 = all)
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long, default_value = "10000")]
    capital: Decimal,
    /// Fraction of cash committed per entry
    #[arg(long, default_value = "1")]
    position_size: Decimal,
    /// Stop-loss fraction below entry (0 = off)
    #[arg(long, default_value = "0")]
    stop_loss: Decimal,
    /// Take-profit fraction above entry (0 = off)
    #[arg(long, default_value = "0")]
    take_profit: Decimal,
    /// Commission rate per fill (overrides BACKTEST_COMMISSION_RATE)
    #[arg(long)]
    commission: Option<Decimal>,
}

impl MarketArgs {
    fn config(&self, strategy_id: &str, strategy_params: StrategyParams) -> anyhow::Result<BacktestConfig> {
        let commission_rate = match self.commission {
            Some(rate) => rate,
            None => env_commission_rate()?.unwrap_or(BacktestConfig::default().commission_rate),
        };
        Ok(BacktestConfig {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            days: self.days,
            initial_capital: self.capital,
            position_size: self.position_size,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            commission_rate,
            strategy_id: strategy_id.to_string(),
            strategy_params,
        })
    }
}

fn env_commission_rate() -> anyhow::Result<Option<Decimal>> {
    match std::env::var("BACKTEST_COMMISSION_RATE") {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .with_context(|| format!("BACKTEST_COMMISSION_RATE is not a number: {}", raw)),
        Err(_) => Ok(None),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "debug,engine=debug,strategy_lab=debug"
    } else {
        "info,engine=info,strategy_lab=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn open_registry(dir: Option<PathBuf>) -> anyhow::Result<StrategyRegistry> {
    let dir = dir.or_else(|| std::env::var("STRATEGY_EXTERNAL_DIR").ok().map(PathBuf::from));
    let registry = match dir {
        Some(dir) => StrategyRegistry::new(Some(dir))?,
        None => StrategyRegistry::with_builtins(),
    };
    for diagnostic in registry.snapshot().diagnostics() {
        warn!("{}", diagnostic);
    }
    Ok(registry)
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<StrategyParams> {
    match raw {
        Some(text) => serde_json::from_str(text).context("--params must be a JSON object"),
        None => Ok(StrategyParams::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = open_registry(cli.strategies_dir)?;

    match cli.command {
        Commands::Strategies { action } => cmd_strategies(&registry, action)?,
        Commands::Run {
            market,
            strategy,
            params,
            export,
        } => {
            cmd_run(&registry, market, strategy, params, export).await?;
        }
        Commands::Compare { market, strategies } => {
            cmd_compare(&registry, market, strategies).await?;
        }
    }

    Ok(())
}

fn cmd_strategies(registry: &StrategyRegistry, action: StrategyCommands) -> anyhow::Result<()> {
    match action {
        StrategyCommands::List { json } => {
            let strategies = registry.list_strategies();
            if json {
                println!("{}", serde_json::to_string_pretty(&strategies)?);
                return Ok(());
            }
            println!("\n{} strategies (registry v{}):", strategies.len(), registry.version());
            for descriptor in &strategies {
                println!("\n  {:<14} {}", descriptor.id, descriptor.name);
                if !descriptor.description.is_empty() {
                    println!("  {:<14} {}", "", descriptor.description);
                }
                for spec in &descriptor.params {
                    let default = spec
                        .default
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "required".to_string());
                    let range = match (spec.min, spec.max) {
                        (Some(min), Some(max)) if max < f64::MAX => format!("[{}, {}]", min, max),
                        _ if !spec.options.is_empty() => spec.options.join("|"),
                        _ => String::new(),
                    };
                    println!(
                        "  {:<14}   {:<18} {:<7} {:<10} {}",
                        "",
                        spec.name,
                        spec.kind.as_str(),
                        default,
                        range
                    );
                }
            }
        }
        StrategyCommands::Source { id } => {
            print!("{}", registry.get_source(&id)?);
        }
        StrategyCommands::Reload => {
            let before = registry.snapshot();
            let outcome = registry.reload();
            for line in reload_report(&before, &outcome) {
                println!("{}", line);
            }
            if !outcome.success {
                anyhow::bail!("reload failed");
            }
        }
    }
    Ok(())
}

/// Reload summary against the table built at startup. Diagnostics already
/// logged while opening the registry are counted, not repeated.
fn reload_report(before: &StrategyTable, outcome: &ReloadOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "{} (v{} -> v{}, {} loaded)",
        outcome.message,
        before.version(),
        outcome.version,
        outcome.loaded
    )];
    let fresh: Vec<&String> = outcome
        .diagnostics
        .iter()
        .filter(|d| !before.diagnostics().contains(d))
        .collect();
    if fresh.is_empty() && !before.diagnostics().is_empty() {
        lines.push(format!(
            "  {} diagnostic(s) unchanged since startup",
            before.diagnostics().len()
        ));
    }
    lines.extend(fresh.into_iter().map(|d| format!("  - {}", d)));
    lines
}

fn banner(now: DateTime<Utc>) -> String {
    format!(
        "=== Strategy Lab v{} === {}",
        APP_VERSION,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

fn print_banner() {
    println!("\n{}", banner(Utc::now()));
}

async fn cmd_run(
    registry: &StrategyRegistry,
    market: MarketArgs,
    strategy: String,
    params: Option<String>,
    export: Option<PathBuf>,
) -> anyhow::Result<()> {
    print_banner();

    let config = market.config(&strategy, parse_params(params.as_deref())?)?;
    let candles = feed::load_candles(&market.candles, market.days).await?;
    let table = registry.snapshot();

    let result = tokio::task::spawn_blocking(move || run_backtest(&table, &config, &candles)).await??;
    print_result(&result);

    if let Some(path) = export {
        let store = JsonFileStore::new(&path);
        store.store(result).await?;
        println!("\nResult exported to {}", path.display());
    }
    Ok(())
}

async fn cmd_compare(
    registry: &StrategyRegistry,
    market: MarketArgs,
    strategies: Vec<String>,
) -> anyhow::Result<()> {
    print_banner();

    let candles: Arc<Vec<Candle>> = Arc::new(feed::load_candles(&market.candles, market.days).await?);
    // One snapshot for every run, so a concurrent reload cannot mix versions
    let table: Arc<StrategyTable> = registry.snapshot();
    let ids: Vec<String> = if strategies.is_empty() {
        table.list().iter().map(|d| d.id.clone()).collect()
    } else {
        strategies
    };
    info!(strategies = ids.len(), bars = candles.len(), "Comparing strategies");

    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let config = market.config(&id, StrategyParams::new())?;
        let table = Arc::clone(&table);
        let candles = Arc::clone(&candles);
        let handle = tokio::task::spawn_blocking(move || run_backtest(&table, &config, &candles));
        handles.push((id, handle));
    }

    let mut results = Vec::new();
    for (id, handle) in handles {
        match handle.await? {
            Ok(result) => results.push(result),
            Err(e) => error!(strategy = %id, error = %e, "Backtest failed"),
        }
    }
    results.sort_by(|a, b| b.metrics.total_return.total_cmp(&a.metrics.total_return));
    print_ranking(&results);
    Ok(())
}

fn pct(value: f64) -> String {
    format!("{:+.2}%", value * 100.0)
}

fn print_result(result: &BacktestResult) {
    let m = &result.metrics;
    println!(
        "\n{} on {} {} | {} -> {} ({} bars, {} days)",
        result.strategy_name,
        result.symbol,
        result.timeframe,
        result.start_time.format("%Y-%m-%d %H:%M"),
        result.end_time.format("%Y-%m-%d %H:%M"),
        result.duration_bars,
        result.duration_days,
    );
    println!(
        "  Capital:      {} -> {:.2}",
        result.initial_capital, result.final_capital
    );
    println!(
        "  Return:       {} total, {} annualized",
        pct(m.total_return),
        pct(m.annual_return)
    );
    println!(
        "  Risk:         max DD {} ({} bars), Sharpe {:.2}, Sortino {:.2}, Calmar {:.2}",
        pct(-m.max_drawdown),
        m.max_drawdown_duration,
        m.sharpe_ratio,
        m.sortino_ratio,
        m.calmar_ratio
    );
    println!(
        "  Trades:       {} ({} won, {} lost), win rate {:.1}%, profit factor {:.2}",
        m.total_trades,
        m.winning_trades,
        m.losing_trades,
        m.win_rate * 100.0,
        m.profit_factor
    );
    println!(
        "  P&L:          avg win {:.2}, avg loss {:.2}, best {:.2}, worst {:.2}, commission {:.2}",
        m.avg_profit, m.avg_loss, m.largest_profit, m.largest_loss, m.total_commission
    );
    if let Some(open) = &result.open_position {
        println!(
            "  Open:         {} @ {} since bar {} (marked to market, not realized)",
            open.quantity.round_dp(6),
            open.entry_price,
            open.entry_bar
        );
    }

    if !result.trades.is_empty() {
        println!(
            "\n  {:>5} {:>5} {:>12} {:>12} {:>10} {:>8}  {}",
            "Entry", "Exit", "Entry px", "Exit px", "PnL", "PnL%", "Reason"
        );
        println!("  {}", "-".repeat(70));
        for trade in result.trades.iter().take(20) {
            println!(
                "  {:>5} {:>5} {:>12} {:>12} {:>+10.2} {:>+7.2}%  {}",
                trade.entry_bar,
                trade.exit_bar,
                trade.entry_price.round_dp(4),
                trade.exit_price.round_dp(4),
                trade.pnl,
                trade.pnl_pct,
                trade.exit_reason
            );
        }
        if result.trades.len() > 20 {
            println!("  ... {} more", result.trades.len() - 20);
        }
    }
}

fn print_ranking(results: &[BacktestResult]) {
    println!("\nRanking ({} strategies):", results.len());
    println!(
        "  {:>3}  {:<24} {:>9} {:>8} {:>7} {:>7} {:>6} {:>7}",
        "#", "Strategy", "Return", "MaxDD", "Sharpe", "Trades", "WR%", "PF"
    );
    println!("  {}", "-".repeat(80));
    for (i, r) in results.iter().enumerate() {
        let m = &r.metrics;
        println!(
            "  {:>3}  {:<24} {:>9} {:>8} {:>7.2} {:>7} {:>5.1}% {:>7.2}",
            i + 1,
            r.strategy_name,
            pct(m.total_return),
            pct(-m.max_drawdown),
            m.sharpe_ratio,
            m.total_trades,
            m.win_rate * 100.0,
            m.profit_factor,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_stamps_utc_time() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        assert_eq!(
            banner(now),
            format!("=== Strategy Lab v{} === 2023-11-14 22:13:20 UTC", APP_VERSION)
        );
    }

    #[test]
    fn test_reload_report_does_not_repeat_startup_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let before = registry.snapshot();
        assert_eq!(before.diagnostics().len(), 1);

        let outcome = registry.reload();
        let report = reload_report(&before, &outcome);
        assert!(report[0].contains("v1 -> v2"));
        assert_eq!(report[1], "  1 diagnostic(s) unchanged since startup");
        assert!(!report.iter().any(|line| line.starts_with("  - ")));
    }

    #[test]
    fn test_reload_report_lists_new_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let before = registry.snapshot();

        std::fs::write(
            dir.path().join("orphan.json"),
            r#"{"id":"orphan","name":"Orphan","base":"nope"}"#,
        )
        .unwrap();
        let outcome = registry.reload();
        let report = reload_report(&before, &outcome);
        assert_eq!(report.len(), 2);
        assert!(report[1].starts_with("  - "));
        assert!(report[1].contains("unknown base `nope`"));
    }
}
