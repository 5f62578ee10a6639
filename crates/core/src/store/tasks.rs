//! Task state operations over the keyed store.
//!
//! Records live at `task:{id}`; producers that only know about blocked items
//! may additionally write a shadow list at `task:{id}:blocked`.

use super::{Store, get_typed, keys, set_typed};
use crate::error::PipelineError;
use crate::types::{BlockedItem, TaskState, dedupe_blocked};

/// Write the full task record.
pub async fn write_task_state(
    store: &dyn Store,
    task_id: &str,
    state: &TaskState,
) -> Result<(), PipelineError> {
    set_typed(store, &keys::task(task_id), state).await?;
    tracing::debug!(task_id, "wrote task state");
    Ok(())
}

/// Fetch a task record. `None` if absent.
pub async fn get_task_state(
    store: &dyn Store,
    task_id: &str,
) -> Result<Option<TaskState>, PipelineError> {
    get_typed(store, &keys::task(task_id)).await
}

/// Write the blocked-only shadow record. Skipped when the list is empty.
pub async fn write_blocked_only(
    store: &dyn Store,
    task_id: &str,
    blocked: &[BlockedItem],
) -> Result<(), PipelineError> {
    if blocked.is_empty() {
        return Ok(());
    }
    set_typed(store, &keys::task_blocked(task_id), &blocked).await?;
    tracing::debug!(task_id, count = blocked.len(), "wrote blocked shadow record");
    Ok(())
}

/// Delete a task record and its blocked shadow (after requeue).
pub async fn delete_task_state(store: &dyn Store, task_id: &str) -> Result<(), PipelineError> {
    store.delete(&keys::task(task_id)).await?;
    store.delete(&keys::task_blocked(task_id)).await?;
    tracing::debug!(task_id, "deleted task state");
    Ok(())
}

/// Read-modify-write after a step outcome: move the step from `next_steps` to
/// `previous_steps` with its result. Returns false (and logs) if the record is
/// missing or the step was already completed by an earlier delivery.
pub async fn update_task_after_step(
    store: &dyn Store,
    task_id: &str,
    step_index: u32,
    step_text: &str,
    result: &str,
) -> Result<bool, PipelineError> {
    let Some(mut state) = get_task_state(store, task_id).await? else {
        tracing::warn!(task_id, step_index, "task record missing, skipping state update");
        return Ok(false);
    };
    if !state.complete_step(step_index, step_text, result) {
        tracing::debug!(task_id, step_index, "step already completed, redelivery tolerated");
        return Ok(false);
    }
    write_task_state(store, task_id, &state).await?;
    Ok(true)
}

/// Ids of all task records (shadow keys excluded).
pub async fn task_ids(store: &dyn Store) -> Result<Vec<String>, PipelineError> {
    let all_keys = store.scan_prefix(keys::TASK_PREFIX).await?;
    Ok(all_keys
        .into_iter()
        .filter(|k| !k.ends_with(keys::TASK_BLOCKED_SUFFIX))
        .map(|k| k[keys::TASK_PREFIX.len()..].to_owned())
        .collect())
}

/// All task records with a non-empty blocked list.
pub async fn tasks_with_blocked(
    store: &dyn Store,
) -> Result<Vec<(String, TaskState)>, PipelineError> {
    let mut out = Vec::new();
    for id in task_ids(store).await? {
        if let Some(state) = get_task_state(store, &id).await?
            && state.has_blocked()
        {
            out.push((id, state));
        }
    }
    Ok(out)
}

/// Aggregate every blocked item across full records and blocked-only shadow
/// records, deduplicated by `(task, reason)`.
pub async fn aggregate_blocked(store: &dyn Store) -> Result<Vec<BlockedItem>, PipelineError> {
    let mut all = Vec::new();
    for key in store.scan_prefix(keys::TASK_PREFIX).await? {
        if key.ends_with(keys::TASK_BLOCKED_SUFFIX) {
            if let Some(items) = get_typed::<Vec<BlockedItem>>(store, &key).await? {
                all.extend(items);
            }
        } else if let Some(state) = get_typed::<TaskState>(store, &key).await? {
            all.extend(state.blocked);
        }
    }
    Ok(dedupe_blocked(all))
}
