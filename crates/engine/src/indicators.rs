//! Shared indicator math
//!
//! Rolling-state indicators used by every built-in strategy. Each one is fed
//! a single value per bar and reports `None` until its trailing window is
//! full, so strategies never act on a partially warmed indicator. Moving
//! averages, MACD and Bollinger Bands wrap the `ta` crate; Wilder RSI and KDJ
//! are computed here because their smoothing differs from `ta`'s.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    SimpleMovingAverage,
};
use ta::{Next, Reset};

use crate::error::{ParamError, ParamResult};

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn ta_error(what: &str, err: ta::errors::TaError) -> ParamError {
    ParamError::Constraint(format!("{}: {:?}", what, err))
}

// ============================================================================
// Pure helpers
// ============================================================================

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

// ============================================================================
// Rolling window
// ============================================================================

/// Fixed-capacity trailing window
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.values.len() == self.capacity
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

// ============================================================================
// Moving averages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaKind {
    Simple,
    Exponential,
}

#[derive(Debug, Clone)]
enum MaInner {
    Simple(SimpleMovingAverage),
    Exponential(ExponentialMovingAverage),
}

/// SMA or EMA that reports a value once `period` bars have been seen
#[derive(Debug, Clone)]
pub struct MovingAverage {
    inner: MaInner,
    period: usize,
    seen: usize,
}

impl MovingAverage {
    pub fn new(kind: MaKind, period: usize) -> ParamResult<Self> {
        let inner = match kind {
            MaKind::Simple => MaInner::Simple(
                SimpleMovingAverage::new(period).map_err(|e| ta_error("SMA period", e))?,
            ),
            MaKind::Exponential => MaInner::Exponential(
                ExponentialMovingAverage::new(period).map_err(|e| ta_error("EMA period", e))?,
            ),
        };
        Ok(Self {
            inner,
            period,
            seen: 0,
        })
    }

    pub fn simple(period: usize) -> ParamResult<Self> {
        Self::new(MaKind::Simple, period)
    }

    pub fn next(&mut self, value: f64) -> Option<f64> {
        let out = match &mut self.inner {
            MaInner::Simple(ma) => ma.next(value),
            MaInner::Exponential(ma) => ma.next(value),
        };
        self.seen += 1;
        (self.seen >= self.period).then_some(out)
    }

    pub fn reset(&mut self) {
        match &mut self.inner {
            MaInner::Simple(ma) => ma.reset(),
            MaInner::Exponential(ma) => ma.reset(),
        }
        self.seen = 0;
    }
}

// ============================================================================
// RSI (Wilder smoothing)
// ============================================================================

/// Wilder RSI seeded with a simple average of the first `period` changes
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    seed_count: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> ParamResult<Self> {
        if period == 0 {
            return Err(ParamError::Constraint("RSI period must be positive".into()));
        }
        Ok(Self {
            period,
            prev_close: None,
            seed_count: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        })
    }

    pub fn next(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;
        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let p = self.period as f64;

        if self.seed_count < self.period {
            self.avg_gain += gain / p;
            self.avg_loss += loss / p;
            self.seed_count += 1;
            if self.seed_count < self.period {
                return None;
            }
        } else {
            self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
            self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        }

        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    pub fn reset(&mut self) {
        self.prev_close = None;
        self.seed_count = 0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }
}

// ============================================================================
// MACD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    inner: MovingAverageConvergenceDivergence,
    warmup: usize,
    seen: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> ParamResult<Self> {
        if fast >= slow {
            return Err(ParamError::Constraint(
                "MACD fast period must be shorter than slow period".into(),
            ));
        }
        let inner = MovingAverageConvergenceDivergence::new(fast, slow, signal)
            .map_err(|e| ta_error("MACD periods", e))?;
        Ok(Self {
            inner,
            warmup: slow + signal - 1,
            seen: 0,
        })
    }

    pub fn next(&mut self, close: f64) -> Option<MacdValue> {
        let out = self.inner.next(close);
        self.seen += 1;
        (self.seen >= self.warmup).then_some(MacdValue {
            macd: out.macd,
            signal: out.signal,
            histogram: out.histogram,
        })
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.seen = 0;
    }
}

// ============================================================================
// Bollinger Bands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands over a population standard deviation
#[derive(Debug, Clone)]
pub struct Bollinger {
    inner: BollingerBands,
    period: usize,
    seen: usize,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64) -> ParamResult<Self> {
        let inner =
            BollingerBands::new(period, multiplier).map_err(|e| ta_error("Bollinger params", e))?;
        Ok(Self {
            inner,
            period,
            seen: 0,
        })
    }

    pub fn next(&mut self, close: f64) -> Option<Bands> {
        let out = self.inner.next(close);
        self.seen += 1;
        (self.seen >= self.period).then_some(Bands {
            upper: out.upper,
            middle: out.average,
            lower: out.lower,
        })
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.seen = 0;
    }
}

// ============================================================================
// KDJ
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdjValue {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Stochastic KDJ: K and D are recursive smoothings of RSV seeded at 50
#[derive(Debug, Clone)]
pub struct Kdj {
    highs: RollingWindow,
    lows: RollingWindow,
    m1: f64,
    m2: f64,
    k: f64,
    d: f64,
}

impl Kdj {
    pub fn new(n: usize, m1: usize, m2: usize) -> ParamResult<Self> {
        if n == 0 || m1 == 0 || m2 == 0 {
            return Err(ParamError::Constraint("KDJ periods must be positive".into()));
        }
        Ok(Self {
            highs: RollingWindow::new(n),
            lows: RollingWindow::new(n),
            m1: m1 as f64,
            m2: m2 as f64,
            k: 50.0,
            d: 50.0,
        })
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> Option<KdjValue> {
        self.highs.push(high);
        self.lows.push(low);
        if !self.highs.is_full() {
            return None;
        }
        let highest = self.highs.max()?;
        let lowest = self.lows.min()?;
        let range = highest - lowest;
        let rsv = if range > 0.0 {
            (close - lowest) / range * 100.0
        } else {
            50.0
        };
        self.k = ((self.m1 - 1.0) * self.k + rsv) / self.m1;
        self.d = ((self.m2 - 1.0) * self.d + self.k) / self.m2;
        Some(KdjValue {
            k: self.k,
            d: self.d,
            j: 3.0 * self.k - 2.0 * self.d,
        })
    }

    pub fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.k = 50.0;
        self.d = 50.0;
    }
}
