//! KDJ stochastic crossover
//!
//! Golden cross of %K over %D buys, death cross sells. With `use_j_line`, an
//! extreme J reading also triggers once K turns in the opposite direction.
//! `require_zone` restricts crosses to the oversold/overbought zones.

use crate::error::{ParamError, ParamResult, StrategyError};
use crate::indicators::{to_f64, Kdj, KdjValue};
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, Strategy};
use crate::types::Candle;

use super::{crossed_above, crossed_below, no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "kdj",
    name: "KDJ Stochastic",
    description: "Trades %K/%D crosses, optionally confirmed by J-line extremes.",
    source: include_str!("kdj.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("n", "RSV period", 9, 3, 30),
        ParamSpec::int("m1", "K smoothing", 3, 2, 10),
        ParamSpec::int("m2", "D smoothing", 3, 2, 10),
        ParamSpec::float("overbought", "Overbought", 80.0, 60.0, 95.0),
        ParamSpec::float("oversold", "Oversold", 20.0, 5.0, 40.0),
        ParamSpec::flag("require_zone", "Require zone", false)
            .describe("Only take crosses where K or D is beyond the oversold/overbought level"),
        ParamSpec::flag("use_j_line", "Use J line", true),
        ParamSpec::float("j_overbought", "J overbought", 100.0, 80.0, 120.0),
        ParamSpec::float("j_oversold", "J oversold", 0.0, -20.0, 20.0),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let mut strategy = KdjStrategy::new(
        params.period("n")?,
        params.period("m1")?,
        params.period("m2")?,
        params.float("overbought")?,
        params.float("oversold")?,
    )?;
    strategy.require_zone = params.flag("require_zone")?;
    if params.flag("use_j_line")? {
        strategy.j_bounds = Some((params.float("j_oversold")?, params.float("j_overbought")?));
    }
    Ok(Box::new(strategy))
}

pub struct KdjStrategy {
    kdj: Kdj,
    overbought: f64,
    oversold: f64,
    require_zone: bool,
    /// (oversold, overbought) J thresholds when the J line is used
    j_bounds: Option<(f64, f64)>,
    prev: Option<KdjValue>,
}

impl KdjStrategy {
    pub fn new(n: usize, m1: usize, m2: usize, overbought: f64, oversold: f64) -> ParamResult<Self> {
        if overbought <= oversold {
            return Err(ParamError::Constraint(format!(
                "overbought ({}) must be greater than oversold ({})",
                overbought, oversold
            )));
        }
        Ok(Self {
            kdj: Kdj::new(n, m1, m2)?,
            overbought,
            oversold,
            require_zone: false,
            j_bounds: None,
            prev: None,
        })
    }
}

impl Strategy for KdjStrategy {
    fn name(&self) -> &str {
        "KDJ Stochastic"
    }

    fn on_bar(&mut self, candle: &Candle, _ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let value = self.kdj.next(
            to_f64(candle.high),
            to_f64(candle.low),
            to_f64(candle.close),
        );
        let Some(cur) = value else {
            return Ok(BarSignal::hold());
        };
        let Some(prev) = self.prev.replace(cur) else {
            return Ok(BarSignal::hold());
        };

        let in_oversold = cur.k < self.oversold || cur.d < self.oversold;
        let in_overbought = cur.k > self.overbought || cur.d > self.overbought;

        if crossed_above((prev.k, prev.d), (cur.k, cur.d)) && (!self.require_zone || in_oversold) {
            return Ok(BarSignal::buy());
        }
        if crossed_below((prev.k, prev.d), (cur.k, cur.d)) && (!self.require_zone || in_overbought)
        {
            return Ok(BarSignal::sell());
        }

        if let Some((j_low, j_high)) = self.j_bounds {
            if cur.j < j_low && cur.k > prev.k {
                return Ok(BarSignal::buy());
            }
            if cur.j > j_high && cur.k < prev.k {
                return Ok(BarSignal::sell());
            }
        }
        Ok(BarSignal::hold())
    }

    fn reset(&mut self) {
        self.kdj.reset();
        self.prev = None;
    }
}
