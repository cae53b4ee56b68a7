//! RSI band exit: buy when RSI climbs out of oversold, sell when it falls
//! back out of overbought.

use crate::error::{ParamError, ParamResult, StrategyError};
use crate::indicators::{to_f64, Rsi};
use crate::params::{ParamSpec, ResolvedParams};
use crate::strategy::{BarContext, BarSignal, Strategy};
use crate::types::Candle;

use super::{no_probe, BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "rsi",
    name: "RSI Reversal",
    description: "Buys when RSI leaves the oversold band and sells when it leaves the overbought band.",
    source: include_str!("rsi.rs"),
    schema,
    factory: StrategyFactory(build),
    probe: no_probe,
};

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::int("period", "RSI period", 14, 2, 50),
        ParamSpec::float("overbought", "Overbought", 70.0, 50.0, 95.0),
        ParamSpec::float("oversold", "Oversold", 30.0, 5.0, 50.0),
    ]
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    Ok(Box::new(RsiStrategy::new(
        params.period("period")?,
        params.float("overbought")?,
        params.float("oversold")?,
    )?))
}

pub struct RsiStrategy {
    rsi: Rsi,
    overbought: f64,
    oversold: f64,
    prev: Option<f64>,
}

impl RsiStrategy {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> ParamResult<Self> {
        if overbought <= oversold {
            return Err(ParamError::Constraint(format!(
                "overbought ({}) must be greater than oversold ({})",
                overbought, oversold
            )));
        }
        Ok(Self {
            rsi: Rsi::new(period)?,
            overbought,
            oversold,
            prev: None,
        })
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "RSI Reversal"
    }

    fn on_bar(&mut self, candle: &Candle, _ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let Some(cur) = self.rsi.next(to_f64(candle.close)) else {
            return Ok(BarSignal::hold());
        };
        let Some(prev) = self.prev.replace(cur) else {
            return Ok(BarSignal::hold());
        };

        if prev < self.oversold && cur >= self.oversold {
            Ok(BarSignal::buy())
        } else if prev > self.overbought && cur <= self.overbought {
            Ok(BarSignal::sell())
        } else {
            Ok(BarSignal::hold())
        }
    }

    fn reset(&mut self) {
        self.rsi.reset();
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Signal;
    use crate::testutil::make_candles;

    #[test]
    fn test_rsi_produces_buy_and_sell() {
        let mut strategy = RsiStrategy::new(6, 70.0, 30.0).unwrap();

        let mut prices: Vec<f64> = (0..15).map(|i| 100.0 - i as f64 * 3.0).collect();
        prices.extend((0..20).map(|i| 58.0 + i as f64 * 4.0));
        prices.extend((0..10).map(|i| 134.0 - i as f64 * 4.0));

        let signals: Vec<Signal> = make_candles(&prices)
            .iter()
            .enumerate()
            .map(|(i, c)| strategy.on_bar(c, &BarContext::flat(i)).unwrap().signal)
            .collect();

        let buy = signals.iter().position(|s| *s == Signal::Buy);
        let sell = signals.iter().position(|s| *s == Signal::Sell);
        assert!(buy.is_some(), "RSI should have generated a buy signal");
        assert!(sell.is_some(), "RSI should have generated a sell signal");
        assert!(buy < sell);
    }

    #[test]
    fn test_rejects_inverted_bands() {
        assert!(RsiStrategy::new(14, 30.0, 70.0).is_err());
    }

    #[test]
    fn test_reset_works() {
        let mut strategy = RsiStrategy::new(14, 70.0, 30.0).unwrap();
        let candles = make_candles(&[100.0; 20]);
        for (i, c) in candles.iter().enumerate() {
            strategy.on_bar(c, &BarContext::flat(i)).unwrap();
        }
        strategy.reset();
        let sig = strategy.on_bar(&candles[0], &BarContext::flat(0)).unwrap();
        assert_eq!(sig.signal, Signal::Hold);
    }
}
