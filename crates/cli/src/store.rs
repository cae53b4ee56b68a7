//! JSON file export for finished backtests

use anyhow::Context;
use async_trait::async_trait;
use engine::{BacktestResult, ResultStore};
use std::path::PathBuf;
use tracing::info;

/// Writes each result as pretty JSON to a fixed path
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn store(&self, result: BacktestResult) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&result)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        info!(path = %self.path.display(), strategy = %result.strategy_id, "Result exported");
        Ok(())
    }
}
