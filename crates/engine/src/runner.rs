//! Backtest runner
//!
//! Resolves a strategy from a registry snapshot, drives the simulator and
//! assembles the final `BacktestResult`. Each call is an independent unit of
//! work: concurrent runs share nothing but the read-only table snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::engine::{validate_candles, BacktestEngine, SimulationOutput};
use crate::error::{BacktestOutcome, InputError, InputResult};
use crate::metrics;
use crate::registry::StrategyTable;
use crate::strategy::Strategy;
use crate::types::{BacktestConfig, BacktestResult, Candle};

const MS_PER_DAY: i64 = 86_400_000;

/// Receives finished results. Implementations decide where they go.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn store(&self, result: BacktestResult) -> anyhow::Result<()>;
}

/// Run `config.strategy_id` from `table` over `candles`
pub fn run_backtest(
    table: &StrategyTable,
    config: &BacktestConfig,
    candles: &[Candle],
) -> BacktestOutcome<BacktestResult> {
    config.validate()?;
    validate_candles(candles)?;

    let descriptor = table.resolve(&config.strategy_id)?;
    let mut strategy = descriptor.instantiate(&config.strategy_params)?;

    info!(
        strategy = %descriptor.id,
        registry_version = table.version(),
        "Resolved strategy"
    );
    run_with_strategy(config, candles, &descriptor.id, &descriptor.name, strategy.as_mut())
}

/// Run an already constructed strategy and assemble the result
pub fn run_with_strategy(
    config: &BacktestConfig,
    candles: &[Candle],
    strategy_id: &str,
    strategy_name: &str,
    strategy: &mut dyn Strategy,
) -> BacktestOutcome<BacktestResult> {
    let output = BacktestEngine::run(config, candles, strategy)?;
    Ok(assemble(config, candles, strategy_id, strategy_name, output)?)
}

fn utc(index: usize, timestamp: i64) -> InputResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp).ok_or_else(|| InputError::InvalidCandle {
        index,
        reason: format!("timestamp {} out of range", timestamp),
    })
}

fn assemble(
    config: &BacktestConfig,
    candles: &[Candle],
    strategy_id: &str,
    strategy_name: &str,
    output: SimulationOutput,
) -> InputResult<BacktestResult> {
    let (first, last) = match (candles.first(), candles.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(InputError::InsufficientCandles {
                got: candles.len(),
                required: crate::engine::MIN_CANDLES,
            })
        }
    };
    let start_time = utc(0, first.timestamp)?;
    let end_time = utc(candles.len() - 1, last.timestamp)?;

    let metrics = metrics::calculate(
        config.initial_capital,
        &output.equity_curve,
        &output.trades,
        config.timeframe,
        output.total_commission,
    );
    let final_capital = output.final_equity();

    Ok(BacktestResult {
        strategy_id: strategy_id.to_string(),
        strategy_name: strategy_name.to_string(),
        symbol: config.symbol.clone(),
        timeframe: config.timeframe,
        config: config.clone(),
        start_time,
        end_time,
        duration_bars: candles.len(),
        duration_days: (last.timestamp - first.timestamp) / MS_PER_DAY + 1,
        initial_capital: config.initial_capital,
        final_capital,
        metrics,
        open_position: output.open_position,
        trades: output.trades,
        equity_curve: output.equity_curve,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BacktestError, StrategyError};
    use crate::metrics::PROFIT_FACTOR_CAP;
    use crate::params::StrategyParams;
    use crate::registry::StrategyRegistry;
    use crate::strategies::builtin_strategies;
    use crate::strategy::{BarContext, BarSignal};
    use crate::testutil::{make_candles, write_file};
    use tempfile::tempdir;
    use crate::types::{ExitReason, Timeframe};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::{Barrier, Mutex};

    fn config(strategy_id: &str) -> BacktestConfig {
        BacktestConfig {
            symbol: "BTC-USDT".to_string(),
            timeframe: Timeframe::M1,
            initial_capital: dec!(1000),
            position_size: Decimal::ONE,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            commission_rate: Decimal::ZERO,
            strategy_id: strategy_id.to_string(),
            ..BacktestConfig::default()
        }
    }

    /// Buys and sells at fixed bars
    struct BuySell {
        buy: usize,
        sell: usize,
    }

    impl Strategy for BuySell {
        fn name(&self) -> &str {
            "buy-sell"
        }

        fn on_bar(&mut self, _: &Candle, ctx: &BarContext) -> Result<BarSignal, StrategyError> {
            Ok(match ctx.bar_index {
                i if i == self.buy => BarSignal::buy(),
                i if i == self.sell => BarSignal::sell(),
                _ => BarSignal::hold(),
            })
        }

        fn reset(&mut self) {}
    }

    fn random_walk(seed: u64, bars: usize) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut close = 100.0_f64;
        (0..bars)
            .map(|i| {
                let open = close;
                close = (close * (1.0 + rng.gen_range(-0.03..0.03))).max(1.0);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
                let dec = |v: f64| Decimal::from_str_exact(&format!("{:.4}", v)).unwrap();
                Candle {
                    timestamp: i as i64 * 3_600_000,
                    open: dec(open),
                    high: dec(high),
                    low: dec(low),
                    close: dec(close),
                    volume: dec(1000.0 + rng.gen_range(0.0..500.0)),
                }
            })
            .collect()
    }

    #[test]
    fn test_round_trip_result() {
        let candles = make_candles(&[100.0, 105.0, 95.0]);
        let result = run_with_strategy(
            &config("dual_ma"),
            &candles,
            "dual_ma",
            "Dual Moving Average",
            &mut BuySell { buy: 1, sell: 2 },
        )
        .unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_price, dec!(105));
        assert_eq!(trade.exit_price, dec!(95));
        assert_eq!(trade.exit_reason, ExitReason::Signal);

        let expected = 1000.0 * 95.0 / 105.0;
        assert_relative_eq!(
            crate::indicators::to_f64(result.final_capital),
            expected,
            epsilon = 1e-6
        );
        assert_relative_eq!(result.metrics.total_return, -0.0952381, epsilon = 1e-6);
        assert_eq!(result.metrics.losing_trades, 1);
        assert_eq!(result.equity_curve.len(), 3);
        assert_eq!(result.duration_bars, 3);
        assert_eq!(result.duration_days, 1);
        assert_eq!(result.start_time.timestamp_millis(), 0);
        assert_eq!(result.end_time.timestamp_millis(), 120_000);
    }

    #[test]
    fn test_single_winner_profit_factor_sentinel() {
        let candles = make_candles(&[100.0, 100.0, 110.0, 110.0]);
        let result = run_with_strategy(
            &config("x"),
            &candles,
            "x",
            "x",
            &mut BuySell { buy: 1, sell: 2 },
        )
        .unwrap();
        assert_eq!(result.metrics.winning_trades, 1);
        assert_eq!(result.metrics.profit_factor, PROFIT_FACTOR_CAP);
        assert_eq!(result.metrics.win_rate, 1.0);
    }

    #[test]
    fn test_hold_only_run_is_flat() {
        let table = StrategyRegistry::with_builtins().snapshot();
        // RSI never leaves its bands on a constant series
        let candles = make_candles(&[100.0; 40]);
        let result = run_backtest(&table, &config("rsi"), &candles).unwrap();
        assert!(result.equity_curve.iter().all(|p| p.equity == dec!(1000)));
        assert_eq!(result.metrics.total_trades, 0);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.sortino_ratio, 0.0);
        assert_eq!(result.metrics.calmar_ratio, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert_eq!(result.final_capital, dec!(1000));
        assert!(result.open_position.is_none());
    }

    #[test]
    fn test_unknown_strategy_and_bad_params_rejected() {
        let table = StrategyRegistry::with_builtins().snapshot();
        let candles = make_candles(&[100.0, 101.0, 102.0]);

        let err = run_backtest(&table, &config("nope"), &candles).unwrap_err();
        assert_eq!(err, BacktestError::Input(InputError::UnknownStrategy("nope".into())));

        let mut cfg = config("macd");
        cfg.strategy_params = json!({ "fast_period": 30, "slow_period": 10 })
            .as_object()
            .cloned()
            .unwrap();
        assert!(matches!(
            run_backtest(&table, &cfg, &candles),
            Err(BacktestError::Input(InputError::InvalidParams { .. }))
        ));

        let mut cfg = config("rsi");
        cfg.strategy_params.insert("bogus".into(), json!(1));
        assert!(run_backtest(&table, &cfg, &candles).is_err());
    }

    #[test]
    fn test_input_errors_before_strategy_resolution() {
        let table = StrategyRegistry::with_builtins().snapshot();
        let one = make_candles(&[100.0]);
        assert!(matches!(
            run_backtest(&table, &config("nope"), &one),
            Err(BacktestError::Input(InputError::InsufficientCandles { got: 1, .. }))
        ));
    }

    #[test]
    fn test_random_walks_hold_invariants_for_every_builtin() {
        let table = StrategyRegistry::with_builtins().snapshot();
        for seed in 0..8 {
            let candles = random_walk(seed, 300);
            for builtin in builtin_strategies() {
                let mut cfg = config(builtin.id);
                cfg.timeframe = Timeframe::H1;
                cfg.commission_rate = dec!(0.001);
                cfg.stop_loss = dec!(0.05);
                cfg.take_profit = dec!(0.08);
                if builtin.id == "grid" {
                    let mut params = StrategyParams::new();
                    params.insert("upper_price".into(), json!(130.0));
                    params.insert("lower_price".into(), json!(70.0));
                    cfg.strategy_params = params;
                }

                let result = run_backtest(&table, &cfg, &candles).unwrap();
                let m = &result.metrics;
                assert_eq!(result.equity_curve.len(), candles.len());
                assert!((0.0..=1.0).contains(&m.max_drawdown), "{} dd {}", builtin.id, m.max_drawdown);
                for value in [m.total_return, m.annual_return, m.sharpe_ratio, m.sortino_ratio, m.calmar_ratio, m.profit_factor] {
                    assert!(value.is_finite(), "{} produced {}", builtin.id, value);
                }
                assert!(result.final_capital > Decimal::ZERO);
                assert!(result.equity_curve.iter().all(|p| p.cash >= Decimal::ZERO));
                assert_eq!(m.total_trades, m.winning_trades + m.losing_trades + result
                    .trades
                    .iter()
                    .filter(|t| t.pnl == Decimal::ZERO)
                    .count());
            }
        }
    }

    #[test]
    fn test_run_completes_against_snapshot_taken_before_reload() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "swing.json",
            r#"{"id":"swing","name":"Swing","base":"rsi","params":{"period":5,"overbought":60,"oversold":40}}"#,
        );
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let candles = random_walk(42, 400);
        let cfg = config("swing");
        let baseline = run_backtest(&registry.snapshot(), &cfg, &candles).unwrap();

        let barrier = Barrier::new(2);
        let in_flight = std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let snapshot = registry.snapshot();
                barrier.wait();
                // reload happens here
                barrier.wait();
                (snapshot.version(), run_backtest(&snapshot, &cfg, &candles))
            });

            barrier.wait();
            write_file(
                dir.path(),
                "swing.json",
                r#"{"id":"swing","name":"Swing v2","base":"macd","params":{"fast_period":5,"slow_period":13}}"#,
            );
            let outcome = registry.reload();
            assert!(outcome.success);
            assert_eq!(outcome.version, 2);
            barrier.wait();
            worker.join().unwrap()
        });

        let (version, result) = in_flight;
        assert_eq!(version, 1);
        assert_eq!(result.unwrap(), baseline);

        let after = run_backtest(&registry.snapshot(), &cfg, &candles).unwrap();
        assert_eq!(after.strategy_name, "Swing v2");
    }

    #[test]
    fn test_concurrent_runs_are_independent() {
        let table = StrategyRegistry::with_builtins().snapshot();
        let candles = random_walk(7, 250);
        let sequential: Vec<_> = ["dual_ma", "macd", "bollinger"]
            .iter()
            .map(|id| run_backtest(&table, &config(id), &candles).unwrap())
            .collect();

        let parallel: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["dual_ma", "macd", "bollinger"]
                .iter()
                .map(|id| {
                    let table = &table;
                    let candles = &candles;
                    scope.spawn(move || run_backtest(table, &config(id), candles).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(sequential, parallel);
    }

    struct MemoryStore(Mutex<Vec<BacktestResult>>);

    #[async_trait]
    impl ResultStore for MemoryStore {
        async fn store(&self, result: BacktestResult) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(result);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_result_store_handoff() {
        let table = StrategyRegistry::with_builtins().snapshot();
        let result = run_backtest(&table, &config("dual_ma"), &random_walk(3, 120)).unwrap();
        let store = MemoryStore(Mutex::new(Vec::new()));
        store.store(result.clone()).await.unwrap();

        let stored = store.0.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], result);

        let json = serde_json::to_value(&stored[0]).unwrap();
        assert_eq!(json["strategy_id"], "dual_ma");
        assert!(json.get("sharpe_ratio").is_some());
    }
}
