//! Performance metrics
//!
//! Derives return, risk and trade statistics from an equity curve and a trade
//! log. Degenerate inputs (flat equity, no drawdown, no losing trades, a zero
//! time span) resolve to fixed sentinels so the result never carries NaN or
//! infinity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::{mean, std_dev, to_f64};
use crate::types::{EquityPoint, Timeframe, Trade};

/// Profit factor reported when there are winning trades but no losing ones
pub const PROFIT_FACTOR_CAP: f64 = 999.99;

/// Bound applied to every ratio so overflowing powers stay finite
pub const RATIO_LIMIT: f64 = 9999.99;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annual_return: f64,
    /// Largest peak-to-trough decline as a fraction of the peak
    pub max_drawdown: f64,
    /// Longest run of bars spent below a previous equity peak
    pub max_drawdown_duration: usize,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_commission: Decimal,
    pub avg_profit: Decimal,
    /// Positive magnitude
    pub avg_loss: Decimal,
    pub largest_profit: Decimal,
    /// Positive magnitude
    pub largest_loss: Decimal,
    pub avg_holding_bars: f64,
}

fn bounded(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-RATIO_LIMIT, RATIO_LIMIT)
    }
}

/// Equity series used by every return metric: the initial capital followed
/// by one sample per candle.
pub fn equity_series(initial_capital: Decimal, curve: &[EquityPoint]) -> Vec<f64> {
    std::iter::once(to_f64(initial_capital))
        .chain(curve.iter().map(|p| to_f64(p.equity)))
        .collect()
}

pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => bounded(last / first - 1.0),
        _ => 0.0,
    }
}

/// Compound annual growth over a span measured in days
pub fn annual_return(total_return: f64, span_days: f64) -> f64 {
    if span_days <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    bounded(growth.powf(365.0 / span_days) - 1.0)
}

/// Per-bar simple returns. Bars whose previous equity is not positive are
/// skipped.
pub fn per_bar_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Maximum drawdown fraction and the longest underwater stretch in bars
pub fn max_drawdown(equity: &[f64]) -> (f64, usize) {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    let mut underwater = 0;
    let mut longest = 0;

    for &value in equity {
        if value >= peak {
            peak = value;
            underwater = 0;
        } else {
            underwater += 1;
            longest = longest.max(underwater);
        }
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    (worst.clamp(0.0, 1.0), longest)
}

/// Annualized Sharpe ratio; 0 for fewer than two returns or zero variance
pub fn sharpe_ratio(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let (Some(avg), Some(sd)) = (mean(returns), std_dev(returns)) else {
        return 0.0;
    };
    if sd == 0.0 {
        return 0.0;
    }
    bounded(avg / sd * bars_per_year.sqrt())
}

/// Root mean square of the negative returns, averaged over every bar
pub fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let squares: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    (squares / returns.len() as f64).sqrt()
}

/// Sharpe numerator over the downside deviation; 0 when no return is negative
pub fn sortino_ratio(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.len() < 2 || !returns.iter().any(|r| *r < 0.0) {
        return 0.0;
    }
    let Some(avg) = mean(returns) else {
        return 0.0;
    };
    let downside = downside_deviation(returns);
    if downside == 0.0 {
        return 0.0;
    }
    bounded(avg / downside * bars_per_year.sqrt())
}

pub fn calmar_ratio(annual_return: f64, max_drawdown: f64) -> f64 {
    if max_drawdown <= 0.0 {
        return 0.0;
    }
    bounded(annual_return / max_drawdown)
}

/// Gross profit over gross loss, with the documented sentinels
pub fn profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> f64 {
    if gross_loss > Decimal::ZERO {
        bounded(to_f64(gross_profit) / to_f64(gross_loss))
    } else if gross_profit > Decimal::ZERO {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    }
}

/// Compute the full metrics set for one run
pub fn calculate(
    initial_capital: Decimal,
    equity_curve: &[EquityPoint],
    trades: &[Trade],
    timeframe: Timeframe,
    total_commission: Decimal,
) -> PerformanceMetrics {
    let equity = equity_series(initial_capital, equity_curve);
    let total = total_return(&equity);
    let span_days = match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp) as f64 / MS_PER_DAY,
        _ => 0.0,
    };
    let annual = annual_return(total, span_days);
    let returns = per_bar_returns(&equity);
    let (drawdown, drawdown_bars) = max_drawdown(&equity);
    let bars_per_year = timeframe.bars_per_year();

    let wins: Vec<Decimal> = trades
        .iter()
        .map(|t| t.pnl)
        .filter(|p| *p > Decimal::ZERO)
        .collect();
    let losses: Vec<Decimal> = trades
        .iter()
        .map(|t| t.pnl)
        .filter(|p| *p < Decimal::ZERO)
        .map(|p| p.abs())
        .collect();
    let gross_profit: Decimal = wins.iter().sum();
    let gross_loss: Decimal = losses.iter().sum();

    let avg = |values: &[Decimal], sum: Decimal| {
        if values.is_empty() {
            Decimal::ZERO
        } else {
            sum / Decimal::from(values.len())
        }
    };

    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins.len() as f64 / trades.len() as f64
    };
    let avg_holding_bars = if trades.is_empty() {
        0.0
    } else {
        trades
            .iter()
            .map(|t| (t.exit_bar - t.entry_bar) as f64)
            .sum::<f64>()
            / trades.len() as f64
    };

    PerformanceMetrics {
        total_return: total,
        annual_return: annual,
        max_drawdown: drawdown,
        max_drawdown_duration: drawdown_bars,
        sharpe_ratio: sharpe_ratio(&returns, bars_per_year),
        sortino_ratio: sortino_ratio(&returns, bars_per_year),
        calmar_ratio: calmar_ratio(annual, drawdown),
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        profit_factor: profit_factor(gross_profit, gross_loss),
        total_commission,
        avg_profit: avg(&wins, gross_profit),
        avg_loss: avg(&losses, gross_loss),
        largest_profit: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
        largest_loss: losses.iter().copied().max().unwrap_or(Decimal::ZERO),
        avg_holding_bars,
    }
}
