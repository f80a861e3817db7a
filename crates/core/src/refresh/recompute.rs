//! Downstream recompute hook.

use async_trait::async_trait;
use log::info;

use crate::errors::Result;

/// Called once per run after at least one batch was persisted.
#[async_trait]
pub trait RecomputeTrigger: Send + Sync {
    async fn on_quotes_refreshed(&self, run_id: &str, symbols: &[String]) -> Result<()>;
}

/// Recompute hook that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecompute;

#[async_trait]
impl RecomputeTrigger for LogRecompute {
    async fn on_quotes_refreshed(&self, run_id: &str, symbols: &[String]) -> Result<()> {
        info!(
            "Run {}: quotes refreshed for {} symbol(s), recompute requested",
            run_id,
            symbols.len()
        );
        Ok(())
    }
}
