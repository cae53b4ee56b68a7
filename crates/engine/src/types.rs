use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{InputError, InputResult};
use crate::metrics::PerformanceMetrics;
use crate::params::StrategyParams;

/// OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in Unix milliseconds
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1H", alias = "1h")]
    H1,
    #[serde(rename = "2H", alias = "2h")]
    H2,
    #[serde(rename = "4H", alias = "4h")]
    H4,
    #[serde(rename = "6H", alias = "6h")]
    H6,
    #[serde(rename = "12H", alias = "12h")]
    H12,
    #[serde(rename = "1D", alias = "1d")]
    D1,
    #[serde(rename = "1W", alias = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1H",
            Timeframe::H2 => "2H",
            Timeframe::H4 => "4H",
            Timeframe::H6 => "6H",
            Timeframe::H12 => "12H",
            Timeframe::D1 => "1D",
            Timeframe::W1 => "1W",
            Timeframe::Mo1 => "1M",
        }
    }

    /// Number of bars in a calendar year, used to annualize per-bar ratios
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Timeframe::M1 => 525_600.0,
            Timeframe::M3 => 175_200.0,
            Timeframe::M5 => 105_120.0,
            Timeframe::M15 => 35_040.0,
            Timeframe::M30 => 17_520.0,
            Timeframe::H1 => 8_760.0,
            Timeframe::H2 => 4_380.0,
            Timeframe::H4 => 2_190.0,
            Timeframe::H6 => 1_460.0,
            Timeframe::H12 => 730.0,
            Timeframe::D1 => 365.0,
            Timeframe::W1 => 52.0,
            Timeframe::Mo1 => 12.0,
        }
    }

    /// Nominal bar length in milliseconds (a month counts as 30 days)
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Timeframe::M1 => MINUTE,
            Timeframe::M3 => 3 * MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::M30 => 30 * MINUTE,
            Timeframe::H1 => 60 * MINUTE,
            Timeframe::H2 => 120 * MINUTE,
            Timeframe::H4 => 240 * MINUTE,
            Timeframe::H6 => 360 * MINUTE,
            Timeframe::H12 => 720 * MINUTE,
            Timeframe::D1 => 1_440 * MINUTE,
            Timeframe::W1 => 10_080 * MINUTE,
            Timeframe::Mo1 => 43_200 * MINUTE,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = InputError;

    /// Minutes are lowercase `m`; `1M` is one month. Hours, days and weeks
    /// accept either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(tf) = Timeframe::ALL.iter().find(|tf| tf.as_str() == s) {
            return Ok(*tf);
        }
        let upper = s.to_uppercase();
        Timeframe::ALL
            .iter()
            .filter(|tf| matches!(tf.as_str().chars().last(), Some('H' | 'D' | 'W')))
            .find(|tf| tf.as_str() == upper)
            .copied()
            .ok_or_else(|| InputError::InvalidConfig {
                field: "timeframe",
                reason: format!("unsupported timeframe `{}`", s),
            })
    }
}

/// Configuration for a single backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Length of the historical window the candles were taken from
    pub days: u32,
    pub initial_capital: Decimal,
    /// Fraction of available cash committed on entry, in [0, 1]
    pub position_size: Decimal,
    /// Stop distance below entry as a fraction, in [0, 1); 0 disables
    pub stop_loss: Decimal,
    /// Target distance above entry as a fraction, >= 0; 0 disables
    pub take_profit: Decimal,
    /// Commission charged on entry and exit notional
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    pub strategy_id: String,
    #[serde(default)]
    pub strategy_params: StrategyParams,
}

fn default_commission_rate() -> Decimal {
    dec!(0.001)
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC-USDT".to_string(),
            timeframe: Timeframe::H1,
            days: 30,
            initial_capital: dec!(10000),
            position_size: Decimal::ONE,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            commission_rate: default_commission_rate(),
            strategy_id: "dual_ma".to_string(),
            strategy_params: StrategyParams::new(),
        }
    }
}

impl BacktestConfig {
    /// Check every field range. Strategy parameters are checked separately
    /// against the strategy's schema.
    pub fn validate(&self) -> InputResult<()> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> InputError {
            InputError::InvalidConfig {
                field,
                reason: reason.into(),
            }
        }

        if self.symbol.trim().is_empty() {
            return Err(invalid("symbol", "must not be empty"));
        }
        if self.strategy_id.trim().is_empty() {
            return Err(invalid("strategy_id", "must not be empty"));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(invalid(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }
        if self.position_size < Decimal::ZERO || self.position_size > Decimal::ONE {
            return Err(invalid(
                "position_size",
                format!("must be within [0, 1], got {}", self.position_size),
            ));
        }
        if self.stop_loss < Decimal::ZERO || self.stop_loss >= Decimal::ONE {
            return Err(invalid(
                "stop_loss",
                format!("must be within [0, 1), got {}", self.stop_loss),
            ));
        }
        if self.take_profit < Decimal::ZERO {
            return Err(invalid(
                "take_profit",
                format!("must be non-negative, got {}", self.take_profit),
            ));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(invalid(
                "commission_rate",
                format!("must be within [0, 1), got {}", self.commission_rate),
            ));
        }
        Ok(())
    }
}

/// An open long position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_time: i64,
    pub entry_bar: usize,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Commission paid when the position was opened
    pub entry_commission: Decimal,
}

/// Simulator position state. Long-only, at most one position at a time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum Position {
    #[default]
    Flat,
    Long(OpenPosition),
}

impl Position {
    pub fn is_long(&self) -> bool {
        matches!(self, Position::Long(_))
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        match self {
            Position::Flat => None,
            Position::Long(pos) => Some(pos.entry_price),
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            Position::Flat => None,
            Position::Long(pos) => Some(pos.quantity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
}

/// What closed a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Signal => write!(f, "signal"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// A realized entry and exit pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: TradeSide,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_bar: usize,
    pub exit_bar: usize,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Exit notional before commission
    pub gross_value: Decimal,
    /// Entry plus exit commission
    pub commission: Decimal,
    /// Net of both commissions
    pub pnl: Decimal,
    /// P&L relative to the entry cost, in percent
    pub pnl_pct: Decimal,
    pub exit_reason: ExitReason,
}

/// Account value sampled at a bar's close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: Decimal,
    pub cash: Decimal,
    pub position_value: Decimal,
}

/// Outcome of one backtest run. Built once by the runner and never mutated.
///
/// A position still open on the last bar is not closed: it is reported in
/// `open_position` and counted in `final_capital` at the last close, but it
/// produces no `Trade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub config: BacktestConfig,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_bars: usize,
    pub duration_days: i64,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
    pub open_position: Option<OpenPosition>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}
