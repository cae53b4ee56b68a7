//! Dual moving average crossover

use crate::error::{ParamError, ParamResult, StrategyError};
use crate::indicators::{to_f64, MaKind, MovingAverage};
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, Strategy};
use crate::types::Candle;

use super::{crossed_above, crossed_below, no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "dual_ma",
    name: "Dual Moving Average",
    description: "Buys when the short average crosses above the long average and sells on the reverse cross.",
    source: include_str!("dual_ma.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

const TREND_PERIOD: usize = 60;
const VOLUME_PERIOD: usize = 20;

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("short_period", "Short MA period", 5, 2, 50),
        ParamSpec::int("long_period", "Long MA period", 20, 5, 200),
        ParamSpec::flag("use_ema", "Use EMA", false)
            .describe("Exponential instead of simple averages"),
        ParamSpec::float("min_volume_ratio", "Min volume ratio", 0.0, 0.0, 10.0)
            .describe("Entry needs volume at least this multiple of the 20-bar average; 0 disables"),
        ParamSpec::flag("trend_filter", "Trend filter", false)
            .describe("Entry needs the close above the 60-bar SMA"),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let kind = if params.flag("use_ema")? {
        MaKind::Exponential
    } else {
        MaKind::Simple
    };
    let strategy = DualMaStrategy::new(
        params.period("short_period")?,
        params.period("long_period")?,
        kind,
    )?
    .with_volume_filter(params.float("min_volume_ratio")?)?
    .with_trend_filter(params.flag("trend_filter")?)?;
    Ok(Box::new(strategy))
}

pub struct DualMaStrategy {
    short: MovingAverage,
    long: MovingAverage,
    trend: Option<MovingAverage>,
    volume: Option<(MovingAverage, f64)>,
    prev: Option<(f64, f64)>,
}

impl DualMaStrategy {
    pub fn new(short_period: usize, long_period: usize, kind: MaKind) -> ParamResult<Self> {
        if short_period >= long_period {
            return Err(ParamError::Constraint(format!(
                "short_period ({}) must be less than long_period ({})",
                short_period, long_period
            )));
        }
        Ok(Self {
            short: MovingAverage::new(kind, short_period)?,
            long: MovingAverage::new(kind, long_period)?,
            trend: None,
            volume: None,
            prev: None,
        })
    }

    pub fn with_volume_filter(mut self, min_ratio: f64) -> ParamResult<Self> {
        self.volume = if min_ratio > 0.0 {
            Some((MovingAverage::simple(VOLUME_PERIOD)?, min_ratio))
        } else {
            None
        };
        Ok(self)
    }

    pub fn with_trend_filter(mut self, enabled: bool) -> ParamResult<Self> {
        self.trend = if enabled {
            Some(MovingAverage::simple(TREND_PERIOD)?)
        } else {
            None
        };
        Ok(self)
    }
}

impl Strategy for DualMaStrategy {
    fn name(&self) -> &str {
        "Dual Moving Average"
    }

    fn on_bar(&mut self, candle: &Candle, _ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let close = to_f64(candle.close);
        let short = self.short.next(close);
        let long = self.long.next(close);

        // Filters must see every bar even when no cross happens
        let trend_ok = match self.trend.as_mut() {
            Some(trend) => trend.next(close).is_some_and(|t| close > t),
            None => true,
        };
        let volume_ok = match self.volume.as_mut() {
            Some((avg, ratio)) => {
                let volume = to_f64(candle.volume);
                avg.next(volume).is_some_and(|v| volume >= v * *ratio)
            }
            None => true,
        };

        let (Some(short), Some(long)) = (short, long) else {
            return Ok(BarSignal::hold());
        };
        let cur = (short, long);
        let Some(prev) = self.prev.replace(cur) else {
            return Ok(BarSignal::hold());
        };

        if crossed_above(prev, cur) && trend_ok && volume_ok {
            Ok(BarSignal::buy())
        } else if crossed_below(prev, cur) {
            Ok(BarSignal::sell())
        } else {
            Ok(BarSignal::hold())
        }
    }

    fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        if let Some(trend) = self.trend.as_mut() {
            trend.reset();
        }
        if let Some((avg, _)) = self.volume.as_mut() {
            avg.reset();
        }
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Signal;
    use crate::testutil::make_candles;

    fn signals(strategy: &mut DualMaStrategy, prices: &[f64]) -> Vec<Signal> {
        make_candles(prices)
            .iter()
            .enumerate()
            .map(|(i, c)| strategy.on_bar(c, &BarContext::flat(i)).unwrap().signal)
            .collect()
    }

    #[test]
    fn test_golden_and_death_cross() {
        let mut strategy = DualMaStrategy::new(2, 4, MaKind::Simple).unwrap();
        let mut prices = vec![100.0, 99.0, 98.0, 97.0, 96.0, 95.0];
        prices.extend([100.0, 106.0, 112.0, 118.0]);
        prices.extend([110.0, 100.0, 90.0, 80.0]);

        let out = signals(&mut strategy, &prices);
        let first_buy = out.iter().position(|s| *s == Signal::Buy).unwrap();
        let first_sell = out.iter().position(|s| *s == Signal::Sell).unwrap();
        assert!(first_buy >= 6);
        assert!(first_sell > first_buy);
        assert_eq!(out.iter().filter(|s| **s == Signal::Buy).count(), 1);
    }

    #[test]
    fn test_no_signal_during_warmup() {
        let mut strategy = DualMaStrategy::new(2, 5, MaKind::Exponential).unwrap();
        let out = signals(&mut strategy, &[100.0, 90.0, 120.0, 80.0, 130.0]);
        assert!(out.iter().all(|s| *s == Signal::Hold));
    }

    #[test]
    fn test_rejects_inverted_periods() {
        assert!(DualMaStrategy::new(20, 5, MaKind::Simple).is_err());
        assert!(DualMaStrategy::new(5, 5, MaKind::Simple).is_err());
    }

    #[test]
    fn test_trend_filter_blocks_early_entries() {
        let mut strategy = DualMaStrategy::new(2, 4, MaKind::Simple)
            .unwrap()
            .with_trend_filter(true)
            .unwrap();
        let mut prices = vec![100.0, 99.0, 98.0, 97.0, 96.0, 95.0];
        prices.extend([100.0, 106.0, 112.0, 118.0]);
        // fewer than 60 bars: the trend SMA is never ready, so no entry
        let out = signals(&mut strategy, &prices);
        assert!(!out.contains(&Signal::Buy));
    }
}
