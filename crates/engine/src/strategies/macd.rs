//! MACD line / signal line crossover

use crate::error::{ParamResult, StrategyError};
use crate::indicators::{to_f64, Macd, MacdValue, MovingAverage};
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, Strategy};
use crate::types::Candle;

use super::{crossed_above, crossed_below, no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "macd",
    name: "MACD Crossover",
    description: "Buys when the MACD line crosses above its signal line and sells on the reverse cross.",
    source: include_str!("macd.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("fast_period", "Fast EMA period", 12, 2, 50),
        ParamSpec::int("slow_period", "Slow EMA period", 26, 5, 100),
        ParamSpec::int("signal_period", "Signal period", 9, 2, 30),
        ParamSpec::flag("use_zero_line", "Zero line filter", false)
            .describe("Only buy below zero and only sell above zero"),
        ParamSpec::flag("use_trend_filter", "Trend filter", false)
            .describe("Only buy while the close is above the trend SMA"),
        ParamSpec::int("trend_ma_period", "Trend SMA period", 200, 50, 500),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let mut strategy = MacdStrategy::new(
        params.period("fast_period")?,
        params.period("slow_period")?,
        params.period("signal_period")?,
    )?;
    strategy.use_zero_line = params.flag("use_zero_line")?;
    if params.flag("use_trend_filter")? {
        strategy.trend = Some(MovingAverage::simple(params.period("trend_ma_period")?)?);
    }
    Ok(Box::new(strategy))
}

pub struct MacdStrategy {
    macd: Macd,
    use_zero_line: bool,
    trend: Option<MovingAverage>,
    prev: Option<MacdValue>,
}

impl MacdStrategy {
    pub fn new(fast: usize, slow: usize, signal: usize) -> ParamResult<Self> {
        Ok(Self {
            macd: Macd::new(fast, slow, signal)?,
            use_zero_line: false,
            trend: None,
            prev: None,
        })
    }
}

impl Strategy for MacdStrategy {
    fn name(&self) -> &str {
        "MACD Crossover"
    }

    fn on_bar(&mut self, candle: &Candle, _ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let close = to_f64(candle.close);
        let trend_ok = match self.trend.as_mut() {
            Some(trend) => trend.next(close).is_some_and(|t| close > t),
            None => true,
        };
        let Some(cur) = self.macd.next(close) else {
            return Ok(BarSignal::hold());
        };
        let Some(prev) = self.prev.replace(cur) else {
            return Ok(BarSignal::hold());
        };

        let prev_pair = (prev.macd, prev.signal);
        let cur_pair = (cur.macd, cur.signal);

        if crossed_above(prev_pair, cur_pair)
            && trend_ok
            && (!self.use_zero_line || cur.macd < 0.0)
        {
            Ok(BarSignal::buy())
        } else if crossed_below(prev_pair, cur_pair) && (!self.use_zero_line || cur.macd > 0.0) {
            Ok(BarSignal::sell())
        } else {
            Ok(BarSignal::hold())
        }
    }

    fn reset(&mut self) {
        self.macd.reset();
        if let Some(trend) = self.trend.as_mut() {
            trend.reset();
        }
        self.prev = None;
    }
}
