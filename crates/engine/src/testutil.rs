//! Candle and fixture builders shared by unit tests

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

fn price(p: f64) -> Decimal {
    Decimal::from_str_exact(&format!("{:.2}", p)).unwrap()
}

/// One-minute candles closing at `prices`, with high/low one unit away
pub fn make_candles(prices: &[f64]) -> Vec<Candle> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let close = price(p);
            Candle {
                timestamp: (i as i64) * 60_000,
                open: close,
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(100),
            }
        })
        .collect()
}

/// Candles with explicit (low, high, close), spaced one day apart
pub fn make_daily_candles(bars: &[(f64, f64, f64)]) -> Vec<Candle> {
    bars.iter()
        .enumerate()
        .map(|(i, &(low, high, close))| Candle {
            timestamp: (i as i64) * 86_400_000,
            open: price(close),
            high: price(high),
            low: price(low),
            close: price(close),
            volume: dec!(100),
        })
        .collect()
}

/// Write a fixture file into a test directory
pub fn write_file(dir: &Path, file: &str, contents: &str) {
    std::fs::write(dir.join(file), contents).unwrap();
}
