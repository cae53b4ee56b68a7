//! Candle files
//!
//! Accepts either an array of candle objects
//! (`{"timestamp", "open", "high", "low", "close", "volume"}`) or the
//! array-of-arrays kline layout returned by exchange REST APIs
//! (`[open_time, "open", "high", "low", "close", "volume", ...]`).

use anyhow::{Context, Result};
use engine::Candle;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCandle {
    Object(Candle),
    Kline(Vec<serde_json::Value>),
}

fn kline_field(row: &[serde_json::Value], index: usize, line: usize) -> Result<Decimal> {
    let value = row
        .get(index)
        .with_context(|| format!("kline {} has no field {}", line, index))?;
    let parsed = match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.with_context(|| format!("kline {} field {} is not a number: {}", line, index, value))
}

fn from_kline(row: &[serde_json::Value], line: usize) -> Result<Candle> {
    let timestamp = row
        .first()
        .and_then(|v| v.as_i64())
        .with_context(|| format!("kline {} has no integer open time", line))?;
    Ok(Candle {
        timestamp,
        open: kline_field(row, 1, line)?,
        high: kline_field(row, 2, line)?,
        low: kline_field(row, 3, line)?,
        close: kline_field(row, 4, line)?,
        volume: kline_field(row, 5, line)?,
    })
}

/// Parse candles from JSON text
pub fn parse_candles(text: &str) -> Result<Vec<Candle>> {
    let raw: Vec<RawCandle> = serde_json::from_str(text).context("candle file is not a JSON array of candles")?;
    raw.into_iter()
        .enumerate()
        .map(|(line, raw)| match raw {
            RawCandle::Object(candle) => Ok(candle),
            RawCandle::Kline(row) => from_kline(&row, line),
        })
        .collect()
}

/// Keep the trailing `days` of candles. Zero keeps everything.
pub fn trailing_window(candles: Vec<Candle>, days: u32) -> Vec<Candle> {
    let Some(last) = candles.last().map(|c| c.timestamp) else {
        return candles;
    };
    if days == 0 {
        return candles;
    }
    let cutoff = last - i64::from(days) * MS_PER_DAY;
    candles.into_iter().filter(|c| c.timestamp > cutoff).collect()
}

/// Load a candle file and trim it to the trailing window
pub async fn load_candles(path: &Path, days: u32) -> Result<Vec<Candle>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read candle file {}", path.display()))?;
    let all = parse_candles(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    let total = all.len();
    let candles = trailing_window(all, days);
    info!(file = %path.display(), total, kept = candles.len(), days, "Loaded candles");
    Ok(candles)
}
