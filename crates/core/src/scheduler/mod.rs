//! Scheduler variants for standalone, periodically-triggered work items.
//!
//! Three interchangeable strategies decide *when* a ready work item is
//! dispatched: event-triggered, cron-window polling, and continuous
//! bounded-batch (speedrun). All three run items through the retry/timeout
//! policy and report start/complete/error metrics keyed by item and run.

mod cron;
mod metrics;
mod speedrun;
mod trigger;

pub use cron::run_cron;
pub use metrics::emit_metric;
pub use speedrun::run_speedrun;
pub use trigger::run_trigger;

use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::Cfg;
use crate::error::PipelineError;
use crate::executor::Runner;
use crate::retry::run_with_policy;
use crate::store::{Store, get_typed, keys, set_typed};
use crate::types::{RunSummary, WorkItem};

/// "Run now" event for the trigger variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub item_id: String,
}

/// Schedule-change notification. Observed and logged by the trigger variant;
/// the cron variant picks changes up on its next listing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleUpdateMessage {
    pub item_id: String,
    pub schedule: String,
}

/// True when the cron expression's next firing falls within a one-minute
/// tolerance window of `now`. Unparseable expressions are logged and never fire.
pub fn should_run_now(cron_expr: &str, now: DateTime<Utc>) -> bool {
    let cron = match Cron::new(cron_expr).parse() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(expr = cron_expr, error = %e, "invalid cron expression");
            return false;
        }
    };
    let from = now - Duration::minutes(1);
    match cron.find_next_occurrence(&from, false) {
        Ok(next) => (next - now).num_seconds().abs() < 60,
        Err(e) => {
            tracing::debug!(expr = cron_expr, error = %e, "no next occurrence");
            false
        }
    }
}

/// Fetch one work item by id.
pub async fn get_item(store: &dyn Store, id: &str) -> Result<Option<WorkItem>, PipelineError> {
    get_typed(store, &keys::workitem(id)).await
}

/// All work items currently in the ready state.
pub async fn ready_items(store: &dyn Store) -> Result<Vec<WorkItem>, PipelineError> {
    let mut items = Vec::new();
    for key in store.scan_prefix(keys::WORKITEM_PREFIX).await? {
        if let Some(item) = get_typed::<WorkItem>(store, &key).await?
            && item.is_ready()
        {
            items.push(item);
        }
    }
    Ok(items)
}

/// All `(item_id, cron expression)` pairs whose work item is ready.
/// Re-listed after every cycle so schedule edits apply without restart.
pub async fn load_all_schedules(
    store: &dyn Store,
) -> Result<Vec<(String, String)>, PipelineError> {
    let mut schedules = Vec::new();
    for key in store.scan_prefix(keys::SCHEDULE_PREFIX).await? {
        let id = key[keys::SCHEDULE_PREFIX.len()..].to_owned();
        let Some(serde_json::Value::String(expr)) = store.get(&key).await? else {
            continue;
        };
        match get_item(store, &id).await? {
            Some(item) if item.is_ready() => schedules.push((id, expr)),
            _ => {}
        }
    }
    tracing::debug!(count = schedules.len(), "loaded active schedules");
    Ok(schedules)
}

/// Execute one work item through the retry/timeout policy, emitting metrics
/// and recording a per-run summary at `runs:{item_id}:{run_ts}`.
pub async fn run_item(
    store: &dyn Store,
    runner: &dyn Runner,
    cfg: &Cfg,
    item: &WorkItem,
) -> Result<String, PipelineError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    emit_metric(
        store,
        &item.id,
        json!({"event": "run_started", "run_id": run_id, "timestamp": started_at}),
    )
    .await?;

    let policy = cfg.retry_policy();
    let result = run_with_policy(&policy, || runner.run(&item.description, "")).await;

    let finished_at = Utc::now();
    let (success, detail) = match &result {
        Ok(output) => {
            emit_metric(
                store,
                &item.id,
                json!({"event": "run_completed", "run_id": run_id, "timestamp": finished_at}),
            )
            .await?;
            (true, output.clone())
        }
        Err(e) => {
            emit_metric(
                store,
                &item.id,
                json!({"event": "run_failed", "run_id": run_id, "error": e.to_string(), "timestamp": finished_at}),
            )
            .await?;
            (false, e.to_string())
        }
    };

    let summary = RunSummary {
        item_id: item.id.clone(),
        run_id,
        success,
        detail,
        started_at,
        finished_at,
    };
    set_typed(store, &keys::run(&item.id, started_at.timestamp_millis()), &summary).await?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::WorkItemState;
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[test]
    fn cron_matches_monday_nine() {
        // 2026-08-03 is a Monday.
        let monday_9 = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        assert!(should_run_now("0 9 * * MON", monday_9));
    }

    #[test]
    fn cron_rejects_tuesday_nine() {
        let tuesday_9 = Utc.with_ymd_and_hms(2026, 8, 4, 9, 0, 0).unwrap();
        assert!(!should_run_now("0 9 * * MON", tuesday_9));
    }

    #[test]
    fn cron_every_five_minutes_window() {
        let minute_3 = Utc.with_ymd_and_hms(2026, 8, 3, 10, 3, 0).unwrap();
        assert!(!should_run_now("*/5 * * * *", minute_3));

        let minute_5 = Utc.with_ymd_and_hms(2026, 8, 3, 10, 5, 0).unwrap();
        assert!(should_run_now("*/5 * * * *", minute_5));
    }

    #[test]
    fn invalid_cron_never_fires() {
        let now = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
        assert!(!should_run_now("not a cron", now));
    }

    struct OkRunner;

    #[async_trait]
    impl Runner for OkRunner {
        fn name(&self) -> &str {
            "ok"
        }

        async fn run(&self, _step: &str, _context: &str) -> Result<String, PipelineError> {
            Ok("ran".into())
        }
    }

    async fn seed_item(store: &MemoryStore, id: &str, state: WorkItemState) {
        let item = WorkItem { id: id.into(), description: format!("{id} work"), state };
        set_typed(store, &keys::workitem(id), &item).await.unwrap();
    }

    #[tokio::test]
    async fn ready_items_filters_paused() {
        let store = MemoryStore::new();
        seed_item(&store, "a", WorkItemState::Ready).await;
        seed_item(&store, "b", WorkItemState::Paused).await;

        let items = ready_items(&store).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[tokio::test]
    async fn schedules_only_for_ready_items() {
        let store = MemoryStore::new();
        seed_item(&store, "a", WorkItemState::Ready).await;
        seed_item(&store, "b", WorkItemState::Paused).await;
        store.set("schedule:a", serde_json::Value::String("0 9 * * MON".into())).await.unwrap();
        store.set("schedule:b", serde_json::Value::String("0 9 * * TUE".into())).await.unwrap();
        store.set("schedule:ghost", serde_json::Value::String("* * * * *".into())).await.unwrap();

        let schedules = load_all_schedules(&store).await.unwrap();
        assert_eq!(schedules, vec![("a".to_string(), "0 9 * * MON".to_string())]);
    }

    #[tokio::test]
    async fn run_item_emits_metrics_and_summary() {
        let store = MemoryStore::new();
        seed_item(&store, "a", WorkItemState::Ready).await;
        let item = get_item(&store, "a").await.unwrap().unwrap();

        let out = run_item(&store, &OkRunner, &Cfg::default(), &item).await.unwrap();
        assert_eq!(out, "ran");

        let events: Vec<serde_json::Value> =
            get_typed(&store, &keys::metrics("a")).await.unwrap().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "run_started");
        assert_eq!(events[1]["event"], "run_completed");

        let runs = store.scan_prefix("runs:a:").await.unwrap();
        assert_eq!(runs.len(), 1);
        let summary: RunSummary = get_typed(&store, &runs[0]).await.unwrap().unwrap();
        assert!(summary.success);
    }

    #[tokio::test]
    async fn failed_run_records_failure() {
        struct FailRunner;

        #[async_trait]
        impl Runner for FailRunner {
            fn name(&self) -> &str {
                "fail"
            }

            async fn run(&self, _s: &str, _c: &str) -> Result<String, PipelineError> {
                Err(PipelineError::NotFound("no backend".into()))
            }
        }

        let store = MemoryStore::new();
        seed_item(&store, "a", WorkItemState::Ready).await;
        let item = get_item(&store, "a").await.unwrap().unwrap();

        let err = run_item(&store, &FailRunner, &Cfg::default(), &item).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let events: Vec<serde_json::Value> =
            get_typed(&store, &keys::metrics("a")).await.unwrap().unwrap();
        assert_eq!(events[1]["event"], "run_failed");
    }
}
