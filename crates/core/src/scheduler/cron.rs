//! Cron variant: fire items whose schedule matches the current minute.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{get_item, load_all_schedules, run_item, should_run_now};
use crate::config::Cfg;
use crate::executor::Runner;
use crate::store::Store;

pub async fn run_cron(
    store: Arc<dyn Store>,
    runner: Arc<dyn Runner>,
    cfg: Cfg,
    token: CancellationToken,
) {
    tracing::info!(check_interval_secs = cfg.cron_check_interval_secs, "cron scheduler started");

    let mut schedules = match load_all_schedules(store.as_ref()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "initial schedule listing failed");
            Vec::new()
        }
    };
    tracing::info!(count = schedules.len(), "loaded initial schedules");

    loop {
        if token.is_cancelled() {
            break;
        }

        let now = Utc::now();
        let mut executed = 0u32;
        for (item_id, cron_expr) in &schedules {
            if !should_run_now(cron_expr, now) {
                continue;
            }
            tracing::info!(item_id = %item_id, schedule = %cron_expr, "cron triggered");
            match get_item(store.as_ref(), item_id).await {
                Ok(Some(item)) => {
                    if let Err(e) = run_item(store.as_ref(), runner.as_ref(), &cfg, &item).await {
                        tracing::warn!(item_id = %item_id, error = %e, "cron run failed");
                    }
                    executed += 1;
                }
                Ok(None) => tracing::warn!(item_id = %item_id, "scheduled item not found"),
                Err(e) => tracing::warn!(item_id = %item_id, error = %e, "item fetch failed"),
            }
        }
        if executed > 0 {
            tracing::info!(executed, "cron cycle complete");
        }

        // Re-list so schedule edits are picked up without restart.
        match load_all_schedules(store.as_ref()).await {
            Ok(s) => schedules = s,
            Err(e) => tracing::warn!(error = %e, "schedule re-listing failed"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(cfg.cron_check_interval_secs)) => {}
        }
    }

    tracing::info!("cron scheduler stopped");
}
