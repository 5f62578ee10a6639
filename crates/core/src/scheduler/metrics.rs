//! Metric emission for scheduler-driven runs.
//!
//! Events append to the item's `metrics:{item_id}` list in the store and are
//! mirrored as tracing events. Whole-record read-modify-write, same as every
//! other store writer.

use crate::error::PipelineError;
use crate::store::{Store, get_typed, keys, set_typed};

pub async fn emit_metric(
    store: &dyn Store,
    item_id: &str,
    event: serde_json::Value,
) -> Result<(), PipelineError> {
    let key = keys::metrics(item_id);
    let mut events: Vec<serde_json::Value> = get_typed(store, &key).await?.unwrap_or_default();
    events.push(event.clone());
    set_typed(store, &key, &events).await?;
    tracing::debug!(item_id, event = %event, "emitted metric");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn metrics_append_in_order() {
        let store = MemoryStore::new();
        emit_metric(&store, "exp-1", json!({"event": "run_started"})).await.unwrap();
        emit_metric(&store, "exp-1", json!({"event": "run_completed"})).await.unwrap();

        let events: Vec<serde_json::Value> =
            get_typed(&store, &keys::metrics("exp-1")).await.unwrap().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "run_started");
    }

    #[tokio::test]
    async fn metrics_are_per_item() {
        let store = MemoryStore::new();
        emit_metric(&store, "exp-1", json!({"event": "a"})).await.unwrap();
        emit_metric(&store, "exp-2", json!({"event": "b"})).await.unwrap();

        let one: Vec<serde_json::Value> =
            get_typed(&store, &keys::metrics("exp-1")).await.unwrap().unwrap();
        assert_eq!(one.len(), 1);
    }
}
