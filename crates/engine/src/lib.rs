//! Strategy Lab Engine: strategies, simulation, and performance metrics
//!
//! Provides:
//! - A `Strategy` trait with seven built-in implementations
//! - A hot-reloadable strategy registry with external JSON definitions
//! - A bar-by-bar long-only simulator with stop-loss/take-profit and commission
//! - Performance metrics with fixed sentinels for degenerate cases

pub mod engine;
pub mod error;
pub mod fees;
pub mod indicators;
pub mod metrics;
pub mod params;
pub mod registry;
pub mod runner;
pub mod strategies;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-exports for convenience
pub use engine::{BacktestEngine, SimulationOutput};
pub use error::{
    BacktestError, InputError, ParamError, RegistryError, RegistryLoadError, StrategyError,
};
pub use fees::CommissionModel;
pub use metrics::PerformanceMetrics;
pub use params::{ParamKind, ParamSpec, StrategyParams};
pub use registry::{ReloadOutcome, StrategyDescriptor, StrategyOrigin, StrategyRegistry, StrategyTable};
pub use runner::{run_backtest, run_with_strategy, ResultStore};
pub use strategy::{BarContext, BarSignal, FillEvent, Signal, Strategy};
pub use types::*;
