//! Built-in strategies
//!
//! Each module exposes a `BUILTIN` entry: display metadata, its parameter
//! schema, the factory that instantiates it from resolved parameters, and
//! its own source text for display. The registry builds its descriptor table
//! from `builtin_strategies()`.

pub mod bollinger;
pub mod dual_ma;
pub mod grid;
pub mod hybrid;
pub mod kdj;
pub mod macd;
pub mod rsi;

use std::fmt;

use crate::error::ParamResult;
use crate::params::{ParamSpec, ResolvedParams, StrategyParams};
use crate::strategy::Strategy;

/// Builds a fresh strategy instance from normalized parameters
#[derive(Clone, Copy)]
pub struct StrategyFactory(pub fn(&ResolvedParams) -> ParamResult<Box<dyn Strategy>>);

impl StrategyFactory {
    pub fn build(&self, params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
        (self.0)(params)
    }
}

impl fmt::Debug for StrategyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StrategyFactory")
    }
}

/// Static description of a built-in strategy
#[derive(Debug, Clone, Copy)]
pub struct BuiltinStrategy {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub source: &'static str,
    pub schema: fn() -> Vec<ParamSpec>,
    pub factory: StrategyFactory,
    /// Parameters used to smoke-test the factory when the registry loads.
    /// Only strategies with required parameters need to supply any.
    pub probe: fn() -> StrategyParams,
}

pub(crate) fn no_probe() -> StrategyParams {
    StrategyParams::new()
}

/// The explicit factory table of built-in strategies, in display order
pub fn builtin_strategies() -> Vec<BuiltinStrategy> {
    vec![
        dual_ma::BUILTIN,
        grid::BUILTIN,
        macd::BUILTIN,
        rsi::BUILTIN,
        kdj::BUILTIN,
        bollinger::BUILTIN,
        hybrid::BUILTIN,
    ]
}

/// `a` moved from at-or-below `b` to strictly above it
pub(crate) fn crossed_above(prev: (f64, f64), cur: (f64, f64)) -> bool {
    prev.0 <= prev.1 && cur.0 > cur.1
}

/// `a` moved from at-or-above `b` to strictly below it
pub(crate) fn crossed_below(prev: (f64, f64), cur: (f64, f64)) -> bool {
    prev.0 >= prev.1 && cur.0 < cur.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{normalize, validate_schema};
    use crate::strategy::BarContext;
    use crate::testutil::make_candles;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_ids_are_unique() {
        let ids: HashSet<_> = builtin_strategies().iter().map(|b| b.id).collect();
        assert_eq!(ids.len(), builtin_strategies().len());
    }

    #[test]
    fn test_every_builtin_builds_from_probe() {
        let prices: Vec<f64> = (0..120)
            .map(|i| 100.0 + 8.0 * ((i as f64) / 6.0).sin())
            .collect();
        let candles = make_candles(&prices);

        for builtin in builtin_strategies() {
            let schema = (builtin.schema)();
            validate_schema(&schema).unwrap();
            let params = normalize(&schema, &(builtin.probe)()).unwrap();
            let mut strategy = builtin.factory.build(&params).unwrap();
            assert!(!strategy.name().is_empty());
            assert!(builtin.source.contains("BUILTIN"));

            for (i, candle) in candles.iter().enumerate() {
                let signal = strategy.on_bar(candle, &BarContext::flat(i)).unwrap();
                signal.validate().unwrap();
            }
            strategy.reset();
        }
    }

    #[test]
    fn test_cross_helpers() {
        assert!(crossed_above((1.0, 2.0), (3.0, 2.0)));
        assert!(crossed_above((2.0, 2.0), (2.1, 2.0)));
        assert!(!crossed_above((3.0, 2.0), (4.0, 2.0)));
        assert!(crossed_below((3.0, 2.0), (1.0, 2.0)));
        assert!(!crossed_below((1.0, 2.0), (0.5, 2.0)));
    }
}
