//! Fixed-rate commission
//!
//! Every fill pays `rate × notional`. On entry the fee is carved out of the
//! cash committed to the trade, so `notional + fee` never exceeds the budget.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionModel {
    pub rate: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            rate: rust_decimal_macros::dec!(0.001),
        }
    }
}

impl CommissionModel {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    /// Fee for a fill of the given notional value
    pub fn on_notional(&self, notional: Decimal) -> Decimal {
        if notional <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        notional * self.rate
    }

    /// Split a cash budget into `(notional, fee)` with `fee = rate × notional`
    /// and `notional + fee = budget`.
    pub fn split_budget(&self, budget: Decimal) -> (Decimal, Decimal) {
        if budget <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let notional = budget / (Decimal::ONE + self.rate);
        (notional, budget - notional)
    }
}
