//! Speedrun variant: run ready items continuously in bounded batches.
//!
//! For demos and continuous testing only — never for production load shaping.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ready_items, run_item};
use crate::config::Cfg;
use crate::executor::Runner;
use crate::store::Store;

pub async fn run_speedrun(
    store: Arc<dyn Store>,
    runner: Arc<dyn Runner>,
    cfg: Cfg,
    token: CancellationToken,
) {
    tracing::info!(
        interval_secs = cfg.speedrun_interval_secs,
        max_per_cycle = cfg.speedrun_max_per_cycle,
        "speedrun scheduler started"
    );

    let mut cycle: u64 = 0;
    loop {
        if token.is_cancelled() {
            break;
        }
        cycle += 1;

        match ready_items(store.as_ref()).await {
            Ok(items) if !items.is_empty() => {
                tracing::info!(cycle, ready = items.len(), "speedrun cycle");
                for item in items.iter().take(cfg.speedrun_max_per_cycle) {
                    if let Err(e) = run_item(store.as_ref(), runner.as_ref(), &cfg, item).await {
                        tracing::warn!(item_id = %item.id, error = %e, "speedrun run failed");
                    }
                }
            }
            Ok(_) => tracing::debug!(cycle, "no ready items"),
            Err(e) => tracing::warn!(error = %e, "ready-item listing failed"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(cfg.speedrun_interval_secs)) => {}
        }
    }

    tracing::info!("speedrun scheduler stopped");
}
