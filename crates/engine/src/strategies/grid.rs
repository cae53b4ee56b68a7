//! Grid trading over a fixed price band
//!
//! The band `[lower_price, upper_price]` is split into `grid_count` intervals.
//! While flat, a close that crosses down through a level buys and remembers
//! that level. While long, a close that crosses up through any level above
//! the remembered one sells. The remembered level follows actual fills, so a
//! buy the simulator could not afford, or a stop-loss exit, keeps the grid
//! in sync.

use serde_json::json;

use crate::error::{ParamError, ParamResult, StrategyError};
use crate::indicators::to_f64;
use crate::params::{ParamSpec, ResolvedParams, StrategyParams};
use crate::strategy::{BarContext, BarSignal, FillEvent, Strategy};
use crate::types::Candle;

use super::{BuiltinStrategy, StrategyFactory};

pub const BUILTIN: BuiltinStrategy = BuiltinStrategy {
    id: "grid",
    name: "Grid Trading",
    description: "Buys on down-crosses of grid levels and sells on up-crosses above the filled level.",
    source: include_str!("grid.rs"),
    schema,
    factory: StrategyFactory(build),
    probe,
};

/// Minimum band width relative to the lower bound
const MIN_BAND: f64 = 0.01;

fn schema() -> Vec<ParamSpec> {
    vec![
        ParamSpec::required_float("upper_price", "Upper price", f64::MIN_POSITIVE, f64::MAX),
        ParamSpec::required_float("lower_price", "Lower price", f64::MIN_POSITIVE, f64::MAX),
        ParamSpec::int("grid_count", "Grid count", 10, 2, 100),
        ParamSpec::select("grid_type", "Spacing", "arithmetic", &["arithmetic", "geometric"])
            .describe("Equal price steps or equal ratio steps between levels"),
    ]
}

fn probe() -> StrategyParams {
    let mut params = StrategyParams::new();
    params.insert("upper_price".into(), json!(110.0));
    params.insert("lower_price".into(), json!(90.0));
    params
}

fn build(params: &ResolvedParams) -> ParamResult<Box<dyn Strategy>> {
    let spacing = match params.choice("grid_type")? {
        "geometric" => GridSpacing::Geometric,
        _ => GridSpacing::Arithmetic,
    };
    let strategy = GridStrategy::new(
        params.float("lower_price")?,
        params.float("upper_price")?,
        params.period("grid_count")?,
        spacing,
    )?;
    Ok(Box::new(strategy))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSpacing {
    Arithmetic,
    Geometric,
}

pub struct GridStrategy {
    levels: Vec<f64>,
    prev_close: Option<f64>,
    pending_level: Option<usize>,
    filled_level: Option<usize>,
}

impl GridStrategy {
    pub fn new(lower: f64, upper: f64, count: usize, spacing: GridSpacing) -> ParamResult<Self> {
        if !(lower > 0.0 && upper > lower) {
            return Err(ParamError::Constraint(format!(
                "upper_price ({}) must be greater than lower_price ({})",
                upper, lower
            )));
        }
        if (upper - lower) / lower < MIN_BAND {
            return Err(ParamError::Constraint(
                "grid band must be at least 1% of lower_price".to_string(),
            ));
        }
        if count < 2 {
            return Err(ParamError::Constraint("grid_count must be at least 2".into()));
        }

        let levels = match spacing {
            GridSpacing::Arithmetic => {
                let step = (upper - lower) / count as f64;
                (0..=count).map(|i| lower + step * i as f64).collect()
            }
            GridSpacing::Geometric => {
                let ratio = (upper / lower).powf(1.0 / count as f64);
                (0..=count).map(|i| lower * ratio.powi(i as i32)).collect()
            }
        };

        Ok(Self {
            levels,
            prev_close: None,
            pending_level: None,
            filled_level: None,
        })
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Highest level crossed downward between `prev` and `close`
    fn crossed_down(&self, prev: f64, close: f64) -> Option<usize> {
        self.levels
            .iter()
            .rposition(|&level| prev > level && close <= level)
    }

    fn crossed_up_above(&self, entry: usize, prev: f64, close: f64) -> bool {
        self.levels
            .iter()
            .skip(entry + 1)
            .any(|&level| prev < level && close >= level)
    }
}

impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        "Grid Trading"
    }

    fn on_bar(&mut self, candle: &Candle, ctx: &BarContext) -> Result<BarSignal, StrategyError> {
        let close = to_f64(candle.close);
        let Some(prev) = self.prev_close.replace(close) else {
            return Ok(BarSignal::hold());
        };

        if ctx.in_position {
            return Ok(match self.filled_level {
                Some(entry) if self.crossed_up_above(entry, prev, close) => BarSignal::sell(),
                _ => BarSignal::hold(),
            });
        }

        self.pending_level = self.crossed_down(prev, close);
        Ok(match self.pending_level {
            Some(_) => BarSignal::buy(),
            None => BarSignal::hold(),
        })
    }

    fn on_fill(&mut self, event: &FillEvent) {
        match event {
            FillEvent::Entered { .. } => self.filled_level = self.pending_level.take(),
            FillEvent::Exited { .. } => self.filled_level = None,
        }
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.pending_level = None;
        self.filled_level = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Signal;
    use crate::testutil::make_candles;
    use crate::types::ExitReason;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_arithmetic_levels() {
        let grid = GridStrategy::new(90.0, 110.0, 4, GridSpacing::Arithmetic).unwrap();
        assert_eq!(grid.levels(), &[90.0, 95.0, 100.0, 105.0, 110.0]);
    }

    #[test]
    fn test_geometric_levels() {
        let grid = GridStrategy::new(100.0, 400.0, 2, GridSpacing::Geometric).unwrap();
        assert_relative_eq!(grid.levels()[1], 200.0, epsilon = 1e-9);
        assert_relative_eq!(grid.levels()[2], 400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_narrow_or_inverted_band() {
        assert!(GridStrategy::new(100.0, 100.5, 4, GridSpacing::Arithmetic).is_err());
        assert!(GridStrategy::new(110.0, 90.0, 4, GridSpacing::Arithmetic).is_err());
    }

    #[test]
    fn test_buy_on_down_cross_sell_above_filled_level() {
        let mut grid = GridStrategy::new(90.0, 110.0, 4, GridSpacing::Arithmetic).unwrap();
        let candles = make_candles(&[102.0, 99.0, 101.0, 106.0]);

        let s0 = grid.on_bar(&candles[0], &BarContext::flat(0)).unwrap();
        assert_eq!(s0.signal, Signal::Hold);

        // 102 -> 99 crosses the 100 level
        let s1 = grid.on_bar(&candles[1], &BarContext::flat(1)).unwrap();
        assert_eq!(s1.signal, Signal::Buy);
        grid.on_fill(&FillEvent::Entered {
            bar_index: 1,
            price: dec!(99),
        });

        let long = |i| BarContext {
            bar_index: i,
            in_position: true,
            entry_price: Some(dec!(99)),
        };
        // 99 -> 101 crosses only the filled level itself
        let s2 = grid.on_bar(&candles[2], &long(2)).unwrap();
        assert_eq!(s2.signal, Signal::Hold);
        // 101 -> 106 crosses 105, above the filled level
        let s3 = grid.on_bar(&candles[3], &long(3)).unwrap();
        assert_eq!(s3.signal, Signal::Sell);

        grid.on_fill(&FillEvent::Exited {
            bar_index: 3,
            price: dec!(106),
            reason: ExitReason::Signal,
        });
        assert!(grid.filled_level.is_none());
    }
}
