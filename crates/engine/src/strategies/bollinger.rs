//! Bollinger Band re-entry

use crate::error::{ParamResult, StrategyError};
use crate::indicators::{to_f64, Bollinger, MovingAverage, Rsi};
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, Strategy};
use crate::types::Candle;

use super::{no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "bollinger",
    name: "Bollinger Bands",
    description: "Buys when price climbs back above the lower band and sells when it falls back below the upper band.",
    source: include_str!("bollinger.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

const RSI_BUY_BELOW: f64 = 40.0;
const RSI_SELL_ABOVE: f64 = 60.0;
const VOLUME_PERIOD: usize = 20;
const VOLUME_SURGE: f64 = 1.2;

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("period", "Band period", 20, 5, 100),
        ParamSpec::float("std_dev", "Std dev multiplier", 2.0, 1.0, 4.0),
        ParamSpec::flag("use_rsi_filter", "RSI filter", true)
            .describe("Buy only with RSI below 40, sell only with RSI above 60"),
        ParamSpec::int("rsi_period", "RSI period", 14, 5, 30),
        ParamSpec::flag("volume_confirm", "Volume confirmation", false)
            .describe("Require volume above 1.2x its 20-bar average"),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let mut strategy = BollingerStrategy::new(params.period("period")?, params.float("std_dev")?)?;
    if params.flag("use_rsi_filter")? {
        strategy.rsi = Some(Rsi::new(params.period("rsi_period")?)?);
    }
    if params.flag("volume_confirm")? {
        strategy.volume = Some(MovingAverage::simple(VOLUME_PERIOD)?);
    }
    Ok(Box::new(strategy))
}

pub struct BollingerStrategy {
    bands: Bollinger,
    rsi: Option<Rsi>,
    volume: Option<MovingAverage>,
    prev_close: Option<f64>,
}

impl BollingerStrategy {
    pub fn new(period: usize, std_dev: f64) -> ParamResult<Self> {
        Ok(Self {
            bands: Bollinger::new(period, std_dev)?,
            rsi: None,
            volume: None,
            prev_close: None,
        })
    }
}

impl Strategy for BollingerStrategy {
    fn name(&self) -> &str {
        "Bollinger Bands"
    }

    fn on_bar(&mut self, candle: &Candle, _ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let close = to_f64(candle.close);
        let bands = self.bands.next(close);
        let prev_close = self.prev_close.replace(close);

        // An RSI that is still warming up does not block
        let rsi = self.rsi.as_mut().and_then(|rsi| rsi.next(close));
        let volume_ok = match self.volume.as_mut() {
            Some(avg) => {
                let volume = to_f64(candle.volume);
                avg.next(volume).is_some_and(|v| volume > v * VOLUME_SURGE)
            }
            None => true,
        };

        let (Some(bands), Some(prev_close)) = (bands, prev_close) else {
            return Ok(BarSignal::hold());
        };

        if prev_close <= bands.lower && close > bands.lower {
            if rsi.map_or(true, |r| r < RSI_BUY_BELOW) && volume_ok {
                return Ok(BarSignal::buy());
            }
        } else if prev_close >= bands.upper
            && close < bands.upper
            && rsi.map_or(true, |r| r > RSI_SELL_ABOVE)
            && volume_ok
        {
            return Ok(BarSignal::sell());
        }
        Ok(BarSignal::hold())
    }

    fn reset(&mut self) {
        self.bands.reset();
        if let Some(rsi) = self.rsi.as_mut() {
            rsi.reset();
        }
        if let Some(avg) = self.volume.as_mut() {
            avg.reset();
        }
        self.prev_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Signal;
    use crate::testutil::make_candles;

    fn run(strategy: &mut BollingerStrategy, prices: &[f64]) -> Vec<Signal> {
        make_candles(prices)
            .iter()
            .enumerate()
            .map(|(i, c)| strategy.on_bar(c, &BarContext::flat(i)).unwrap().signal)
            .collect()
    }

    #[test]
    fn test_buy_on_lower_band_reentry() {
        let mut strategy = BollingerStrategy::new(10, 2.0).unwrap();
        let mut prices: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        prices.push(90.0); // pierces the lower band
        prices.push(100.0); // back inside
        let out = run(&mut strategy, &prices);
        assert_eq!(out[10], Signal::Hold);
        assert_eq!(out[11], Signal::Buy);
    }

    #[test]
    fn test_sell_on_upper_band_reentry() {
        let mut strategy = BollingerStrategy::new(10, 2.0).unwrap();
        let mut prices: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        prices.push(112.0);
        prices.push(101.0);
        let out = run(&mut strategy, &prices);
        assert_eq!(out[11], Signal::Sell);
    }

    #[test]
    fn test_rsi_filter_blocks_sell_when_momentum_low() {
        let mut strategy = BollingerStrategy::new(10, 2.0).unwrap();
        strategy.rsi = Some(Rsi::new(5).unwrap());
        // long decline keeps RSI low, so an upper-band re-entry is ignored
        let mut prices: Vec<f64> = (0..10).map(|i| 130.0 - i as f64 * 3.0).collect();
        prices.push(125.0);
        prices.push(100.0);
        let out = run(&mut strategy, &prices);
        assert!(!out.contains(&Signal::Sell));
    }
}
