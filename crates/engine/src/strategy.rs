//! Strategy abstraction
//!
//! A strategy sees one candle at a time and answers with exactly one
//! `BarSignal`. Indicator state lives inside the strategy and is updated
//! incrementally, so the simulator never hands over the full history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StrategyError;
use crate::types::{Candle, ExitReason};

/// Per-bar trading decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Hold,
    Buy,
    Sell,
    ClosePosition,
}

/// A signal with an optional target position fraction in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarSignal {
    pub signal: Signal,
    pub size: Option<f64>,
}

impl BarSignal {
    pub fn hold() -> Self {
        Self {
            signal: Signal::Hold,
            size: None,
        }
    }

    pub fn buy() -> Self {
        Self {
            signal: Signal::Buy,
            size: None,
        }
    }

    /// Buy committing `size` of available cash instead of the configured fraction
    pub fn buy_sized(size: f64) -> Self {
        Self {
            signal: Signal::Buy,
            size: Some(size),
        }
    }

    pub fn sell() -> Self {
        Self {
            signal: Signal::Sell,
            size: None,
        }
    }

    pub fn close() -> Self {
        Self {
            signal: Signal::ClosePosition,
            size: None,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.signal == Signal::Hold
    }

    /// Reject sizes the simulator cannot act on
    pub fn validate(&self) -> Result<(), StrategyError> {
        match self.size {
            Some(size) if !size.is_finite() || !(0.0..=1.0).contains(&size) => Err(
                StrategyError::new(format!("signal size {} is outside [0, 1]", size)),
            ),
            _ => Ok(()),
        }
    }
}

/// Read-only view of the simulator state handed to a strategy each bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarContext {
    pub bar_index: usize,
    pub in_position: bool,
    pub entry_price: Option<Decimal>,
}

impl BarContext {
    pub fn flat(bar_index: usize) -> Self {
        Self {
            bar_index,
            in_position: false,
            entry_price: None,
        }
    }
}

/// Fill notification sent back to the strategy after the simulator acts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillEvent {
    Entered { bar_index: usize, price: Decimal },
    Exited {
        bar_index: usize,
        price: Decimal,
        reason: ExitReason,
    },
}

/// Bar-by-bar strategy
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Consume the next candle and decide. Called for every candle in order,
    /// including bars where a risk exit overrides the decision.
    fn on_bar(&mut self, candle: &Candle, ctx: &BarContext) -> Result<BarSignal, StrategyError>;

    /// Called after a position is opened or closed
    fn on_fill(&mut self, _event: &FillEvent) {}

    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_constructors() {
        assert!(BarSignal::hold().is_hold());
        assert_eq!(BarSignal::buy().signal, Signal::Buy);
        assert_eq!(BarSignal::sell().signal, Signal::Sell);
        assert_eq!(BarSignal::close().signal, Signal::ClosePosition);
        assert_eq!(BarSignal::buy_sized(0.25).size, Some(0.25));
    }

    #[test]
    fn test_signal_size_validation() {
        assert!(BarSignal::buy_sized(1.0).validate().is_ok());
        assert!(BarSignal::buy_sized(0.0).validate().is_ok());
        assert!(BarSignal::buy_sized(1.5).validate().is_err());
        assert!(BarSignal::buy_sized(-0.1).validate().is_err());
        assert!(BarSignal::buy_sized(f64::NAN).validate().is_err());
    }
}
