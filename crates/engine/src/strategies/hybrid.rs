//! Multi-indicator hybrid
//!
//! Runs several built-in strategies side by side and combines their votes.
//! The schema declares which sub-strategies take part (`use_*` flags) and
//! the combination rule (`signal_mode`).

use crate::error::{ParamError, ParamResult, StrategyError};
use crate::indicators::MaKind;
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, FillEvent, Signal, Strategy};
use crate::types::Candle;

use super::bollinger::BollingerStrategy;
use super::dual_ma::DualMaStrategy;
use super::kdj::KdjStrategy;
use super::macd::MacdStrategy;
use super::rsi::RsiStrategy;
use super::{no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "hybrid",
    name: "Multi-Indicator Hybrid",
    description: "Combines RSI, Bollinger, MACD, KDJ and moving-average votes under an any/majority/all rule.",
    source: include_str!("hybrid.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::flag("use_rsi", "Use RSI", true),
        ParamSpec::flag("use_bollinger", "Use Bollinger", true),
        ParamSpec::flag("use_macd", "Use MACD", true),
        ParamSpec::flag("use_kdj", "Use KDJ", false),
        ParamSpec::flag("use_dual_ma", "Use dual MA", false),
        ParamSpec::select("signal_mode", "Combination rule", "majority", &["any", "majority", "all"])
            .describe("any: one vote, majority: more than half, all: every enabled sub-strategy"),
        ParamSpec::int("rsi_period", "RSI period", 14, 2, 50),
        ParamSpec::float("rsi_overbought", "RSI overbought", 70.0, 50.0, 95.0),
        ParamSpec::float("rsi_oversold", "RSI oversold", 30.0, 5.0, 50.0),
        ParamSpec::int("bb_period", "Band period", 20, 5, 100),
        ParamSpec::float("bb_std", "Band std dev", 2.0, 1.0, 4.0),
        ParamSpec::int("macd_fast", "MACD fast", 12, 2, 50),
        ParamSpec::int("macd_slow", "MACD slow", 26, 5, 100),
        ParamSpec::int("macd_signal", "MACD signal", 9, 2, 30),
        ParamSpec::int("kdj_n", "KDJ period", 9, 3, 30),
        ParamSpec::int("ma_short", "Short MA", 5, 2, 50),
        ParamSpec::int("ma_long", "Long MA", 20, 5, 200),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let mut members: Vec<Box<dyn Strategy>> = Vec::new();
    if params.flag("use_rsi")? {
        members.push(Box::new(RsiStrategy::new(
            params.period("rsi_period")?,
            params.float("rsi_overbought")?,
            params.float("rsi_oversold")?,
        )?));
    }
    if params.flag("use_bollinger")? {
        members.push(Box::new(BollingerStrategy::new(
            params.period("bb_period")?,
            params.float("bb_std")?,
        )?));
    }
    if params.flag("use_macd")? {
        members.push(Box::new(MacdStrategy::new(
            params.period("macd_fast")?,
            params.period("macd_slow")?,
            params.period("macd_signal")?,
        )?));
    }
    if params.flag("use_kdj")? {
        members.push(Box::new(KdjStrategy::new(
            params.period("kdj_n")?,
            3,
            3,
            80.0,
            20.0,
        )?));
    }
    if params.flag("use_dual_ma")? {
        members.push(Box::new(DualMaStrategy::new(
            params.period("ma_short")?,
            params.period("ma_long")?,
            MaKind::Simple,
        )?));
    }

    let mode = match params.choice("signal_mode")? {
        "any" => CombineMode::Any,
        "all" => CombineMode::All,
        _ => CombineMode::Majority,
    };
    Ok(Box::new(HybridStrategy::new(members, mode)?))
}

/// How member votes are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// At least one member agrees
    Any,
    /// More than half of the members agree
    Majority,
    /// Every member agrees on the same bar
    All,
}

impl CombineMode {
    fn passes(&self, votes: usize, members: usize) -> bool {
        match self {
            CombineMode::Any => votes >= 1,
            CombineMode::Majority => votes * 2 > members,
            CombineMode::All => votes == members,
        }
    }
}

pub struct HybridStrategy {
    members: Vec<Box<dyn Strategy>>,
    mode: CombineMode,
}

impl HybridStrategy {
    pub fn new(members: Vec<Box<dyn Strategy>>, mode: CombineMode) -> ParamResult<Self> {
        if members.len() < 2 {
            return Err(ParamError::Constraint(format!(
                "hybrid needs at least two sub-strategies, {} enabled",
                members.len()
            )));
        }
        Ok(Self { members, mode })
    }
}

impl Strategy for HybridStrategy {
    fn name(&self) -> &str {
        "Multi-Indicator Hybrid"
    }

    fn on_bar(&mut self, candle: &Candle, ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let mut buys = 0;
        let mut sells = 0;
        // Every member sees every bar, so no early exit here
        for member in &mut self.members {
            let signal = member.on_bar(candle, ctx).map_err(|e| {
                StrategyError::new(format!("{}: {}", member.name(), e.message))
            })?;
            match signal.signal {
                Signal::Buy => buys += 1,
                Signal::Sell | Signal::ClosePosition => sells += 1,
                Signal::Hold => {}
            }
        }

        let total = self.members.len();
        if buys > sells && self.mode.passes(buys, total) {
            Ok(BarSignal::buy())
        } else if sells > buys && self.mode.passes(sells, total) {
            Ok(BarSignal::sell())
        } else {
            Ok(BarSignal::hold())
        }
    }

    fn on_fill(&mut self, event: &FillEvent) {
        for member in &mut self.members {
            member.on_fill(event);
        }
    }

    fn reset(&mut self) {
        for member in &mut self.members {
            member.reset();
        }
    }
}
