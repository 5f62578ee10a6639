//! Trigger variant: execute on explicit "run now" events.
//!
//! Also observes the schedule-update channel. Updates are only logged here;
//! they take effect when the cron variant next re-lists schedules.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ScheduleUpdateMessage, TriggerMessage, get_item, run_item};
use crate::config::Cfg;
use crate::error::PipelineError;
use crate::executor::Runner;
use crate::queue::{Delivery, Queue, names};
use crate::store::Store;

pub async fn run_trigger(
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    runner: Arc<dyn Runner>,
    cfg: Cfg,
    token: CancellationToken,
) {
    if let Err(e) = queue.reclaim(names::EXECUTE_NOW, cfg.reclaim_after_secs).await {
        tracing::warn!(error = %e, "execute-now reclaim failed");
    }
    tracing::info!("trigger scheduler started");

    loop {
        if token.is_cancelled() {
            break;
        }

        match queue.fetch(names::EXECUTE_NOW).await {
            Ok(Some(delivery)) => {
                handle_trigger(store.as_ref(), queue.as_ref(), runner.as_ref(), &cfg, delivery)
                    .await;
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "execute-now fetch failed"),
        }

        match queue.fetch(names::SCHEDULE_UPDATES).await {
            Ok(Some(delivery)) => {
                match delivery.parse::<ScheduleUpdateMessage>() {
                    Ok(update) => tracing::info!(
                        item_id = %update.item_id,
                        schedule = %update.schedule,
                        "schedule update received"
                    ),
                    Err(e) => tracing::warn!(error = %e, "unparseable schedule update"),
                }
                if let Err(e) = queue.ack(names::SCHEDULE_UPDATES, delivery.id).await {
                    tracing::warn!(error = %e, "schedule-update ack failed");
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "schedule-update fetch failed"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(cfg.idle_poll()) => {}
        }
    }

    tracing::info!("trigger scheduler stopped");
}

async fn handle_trigger(
    store: &dyn Store,
    queue: &dyn Queue,
    runner: &dyn Runner,
    cfg: &Cfg,
    delivery: Delivery,
) {
    let outcome: Result<(), PipelineError> = async {
        let msg: TriggerMessage = delivery.parse()?;
        match get_item(store, &msg.item_id).await? {
            Some(item) => {
                tracing::info!(item_id = %item.id, "trigger received, executing");
                if let Err(e) = run_item(store, runner, cfg, &item).await {
                    // The run failure is recorded in metrics; the trigger
                    // message itself is done.
                    tracing::warn!(item_id = %item.id, error = %e, "triggered run failed");
                }
            }
            None => tracing::warn!(item_id = %msg.item_id, "work item not found"),
        }
        Ok(())
    }
    .await;

    let result = match outcome {
        Ok(()) => queue.ack(names::EXECUTE_NOW, delivery.id).await,
        Err(PipelineError::Malformed(reason)) => {
            tracing::error!(%reason, "dropping unparseable trigger message");
            queue.nack(names::EXECUTE_NOW, delivery.id, false).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "trigger handling failed, redelivering");
            queue.nack(names::EXECUTE_NOW, delivery.id, true).await
        }
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "execute-now ack/nack failed");
    }
}
