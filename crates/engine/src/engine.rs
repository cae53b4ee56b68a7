//! Bar-by-bar backtest simulator
//!
//! A two-state machine (`Flat`, `Long`) evaluated once per candle:
//!
//! 1. While long, the stop-loss and take-profit levels are checked against the
//!    candle's low and high. A breach exits at the level price and overrides
//!    the strategy's signal for the bar.
//! 2. Otherwise `Buy` opens a position when flat and `Sell`/`ClosePosition`
//!    closes it at the close when long. Everything else leaves the state alone.
//! 3. An equity sample is recorded at the close of every candle.
//!
//! A position still open after the last candle stays open and is only marked
//! to market.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::{BacktestError, BacktestOutcome, InputError, InputResult};
use crate::fees::CommissionModel;
use crate::strategy::{BarContext, FillEvent, Signal, Strategy};
use crate::types::*;

/// Fewest candles a run accepts
pub const MIN_CANDLES: usize = 2;

/// Raw simulation output, before metrics are derived
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutput {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_cash: Decimal,
    pub open_position: Option<OpenPosition>,
    pub total_commission: Decimal,
}

impl SimulationOutput {
    pub fn final_equity(&self) -> Decimal {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.final_cash)
    }
}

/// Check the candle sequence before a run starts
pub fn validate_candles(candles: &[Candle]) -> InputResult<()> {
    if candles.len() < MIN_CANDLES {
        return Err(InputError::InsufficientCandles {
            got: candles.len(),
            required: MIN_CANDLES,
        });
    }
    for (index, candle) in candles.iter().enumerate() {
        if candle.close <= Decimal::ZERO {
            return Err(InputError::InvalidCandle {
                index,
                reason: format!("non-positive close {}", candle.close),
            });
        }
        if candle.low > candle.high {
            return Err(InputError::InvalidCandle {
                index,
                reason: format!("low {} above high {}", candle.low, candle.high),
            });
        }
    }
    if let Some(index) = candles
        .windows(2)
        .position(|pair| pair[1].timestamp <= pair[0].timestamp)
    {
        return Err(InputError::UnsortedCandles { index: index + 1 });
    }
    Ok(())
}

/// Backtesting engine that simulates bar-by-bar execution
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run `strategy` over `candles`. Inputs are validated first; a strategy
    /// error aborts the run and reports the bar it happened on.
    pub fn run(
        config: &BacktestConfig,
        candles: &[Candle],
        strategy: &mut dyn Strategy,
    ) -> BacktestOutcome<SimulationOutput> {
        config.validate()?;
        validate_candles(candles)?;

        let fees = CommissionModel::new(config.commission_rate);
        let mut cash = config.initial_capital;
        let mut position = Position::Flat;
        let mut total_commission = Decimal::ZERO;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(candles.len());

        info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            strategy = strategy.name(),
            bars = candles.len(),
            capital = %config.initial_capital,
            "Starting backtest"
        );

        for (bar_index, candle) in candles.iter().enumerate() {
            let ctx = BarContext {
                bar_index,
                in_position: position.is_long(),
                entry_price: position.entry_price(),
            };
            let strategy_error = |message: String| BacktestError::Strategy {
                bar_index,
                message,
            };

            // The strategy sees every bar so its rolling state stays complete
            let decision = strategy
                .on_bar(candle, &ctx)
                .map_err(|e| strategy_error(e.message))?;
            decision
                .validate()
                .map_err(|e| strategy_error(e.message))?;

            let exit = match &position {
                Position::Long(open) => Self::risk_exit(config, open, candle).or_else(|| {
                    matches!(decision.signal, Signal::Sell | Signal::ClosePosition)
                        .then_some((candle.close, ExitReason::Signal))
                }),
                Position::Flat => None,
            };

            if let Some((price, reason)) = exit {
                if let Position::Long(open) = std::mem::take(&mut position) {
                    let (trade, exit_fee) = Self::close(open, candle, bar_index, price, reason, &fees);
                    cash += trade.gross_value - exit_fee;
                    total_commission += exit_fee;
                    strategy.on_fill(&FillEvent::Exited {
                        bar_index,
                        price,
                        reason,
                    });
                    trades.push(trade);
                }
            } else if decision.signal == Signal::Buy && !position.is_long() {
                let fraction = match decision.size {
                    Some(size) => Decimal::from_f64(size).ok_or_else(|| {
                        strategy_error(format!("signal size {} is not representable", size))
                    })?,
                    None => config.position_size,
                };
                let budget = cash * fraction;
                let (notional, entry_fee) = fees.split_budget(budget);
                let quantity = notional / candle.close;

                if quantity <= Decimal::ZERO {
                    debug!(bar = bar_index, cash = %cash, "Insufficient cash, buy ignored");
                } else {
                    cash -= notional + entry_fee;
                    total_commission += entry_fee;
                    position = Position::Long(OpenPosition {
                        entry_time: candle.timestamp,
                        entry_bar: bar_index,
                        entry_price: candle.close,
                        quantity,
                        entry_commission: entry_fee,
                    });
                    strategy.on_fill(&FillEvent::Entered {
                        bar_index,
                        price: candle.close,
                    });
                    debug!(
                        bar = bar_index,
                        price = %candle.close,
                        quantity = %quantity,
                        fee = %entry_fee,
                        "Opened LONG position"
                    );
                }
            }

            let position_value = position
                .quantity()
                .map(|q| q * candle.close)
                .unwrap_or(Decimal::ZERO);
            equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity: cash + position_value,
                cash,
                position_value,
            });
        }

        let open_position = match position {
            Position::Long(open) => Some(open),
            Position::Flat => None,
        };

        info!(
            trades = trades.len(),
            final_cash = %cash,
            open_position = open_position.is_some(),
            "Backtest complete"
        );

        Ok(SimulationOutput {
            trades,
            equity_curve,
            final_cash: cash,
            open_position,
            total_commission,
        })
    }

    /// Stop-loss first, then take-profit. A zero fraction disables the check.
    fn risk_exit(
        config: &BacktestConfig,
        open: &OpenPosition,
        candle: &Candle,
    ) -> Option<(Decimal, ExitReason)> {
        if config.stop_loss > Decimal::ZERO {
            let stop = open.entry_price * (Decimal::ONE - config.stop_loss);
            if candle.low <= stop {
                return Some((stop, ExitReason::StopLoss));
            }
        }
        if config.take_profit > Decimal::ZERO {
            let target = open.entry_price * (Decimal::ONE + config.take_profit);
            if candle.high >= target {
                return Some((target, ExitReason::TakeProfit));
            }
        }
        None
    }

    fn close(
        open: OpenPosition,
        candle: &Candle,
        bar_index: usize,
        price: Decimal,
        reason: ExitReason,
        fees: &CommissionModel,
    ) -> (Trade, Decimal) {
        let gross_value = open.quantity * price;
        let exit_fee = fees.on_notional(gross_value);
        let cost = open.quantity * open.entry_price + open.entry_commission;
        let pnl = gross_value - exit_fee - cost;
        let pnl_pct = if cost > Decimal::ZERO {
            pnl / cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        debug!(
            bar = bar_index,
            entry = %open.entry_price,
            exit = %price,
            pnl = %pnl,
            reason = %reason,
            "Closed position"
        );

        let trade = Trade {
            side: TradeSide::Long,
            entry_time: open.entry_time,
            exit_time: candle.timestamp,
            entry_bar: open.entry_bar,
            exit_bar: bar_index,
            entry_price: open.entry_price,
            exit_price: price,
            quantity: open.quantity,
            gross_value,
            commission: open.entry_commission + exit_fee,
            pnl,
            pnl_pct,
            exit_reason: reason,
        };
        (trade, exit_fee)
    }
}
