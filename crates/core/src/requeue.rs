//! Convergence driver: republish blocked work for a fresh planning pass.
//!
//! Cycle N's unresolved blocked items become cycle N+1's intake requests,
//! evaluated against whatever the feedback stage has added to the capability
//! registry in between. Termination is the caller's decision — stop after a
//! fixed number of cycles, or when the requeued count reaches zero.

use crate::error::PipelineError;
use crate::queue::{Queue, names, publish_typed};
use crate::store::{Store, tasks};
use crate::types::IntakeMessage;

/// Republish every task with unresolved blocked items as a brand-new intake
/// request (it receives a fresh id on the next planning pass) and delete the
/// stale record. Returns the number of tasks requeued.
pub async fn requeue_blocked(store: &dyn Store, queue: &dyn Queue) -> Result<u64, PipelineError> {
    let blocked_tasks = tasks::tasks_with_blocked(store).await?;
    if blocked_tasks.is_empty() {
        tracing::info!("no tasks with blocked items to requeue");
        return Ok(0);
    }

    let mut count = 0u64;
    for (i, (task_id, state)) in blocked_tasks.into_iter().enumerate() {
        let msg = IntakeMessage {
            task: state.context,
            topic: state.topic,
            order: state.order.or(Some((i + 1) as i64)),
            source: "requeue".into(),
        };
        publish_typed(queue, names::INTAKE, &msg).await?;
        tasks::delete_task_state(store, &task_id).await?;
        count += 1;
    }

    tracing::info!(count, "requeued blocked tasks and deleted stale records");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use crate::types::{BlockedItem, TaskState};

    fn state(context: &str, blocked: bool) -> TaskState {
        TaskState::new(
            context,
            "demo",
            None,
            vec!["pending step".into()],
            if blocked {
                vec![BlockedItem { task: "do C".into(), reason: "no tool".into() }]
            } else {
                vec![]
            },
        )
    }

    #[tokio::test]
    async fn requeues_only_blocked_and_deletes_them() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        for (id, blocked) in
            [("b1", true), ("b2", true), ("b3", true), ("c1", false), ("c2", false)]
        {
            tasks::write_task_state(&store, id, &state(&format!("task {id}"), blocked))
                .await
                .unwrap();
        }

        let count = requeue_blocked(&store, &queue).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(queue.len(names::INTAKE).await.unwrap(), 3);

        // Blocked records deleted, clean ones untouched.
        let remaining = tasks::task_ids(&store).await.unwrap();
        assert_eq!(remaining, vec!["c1".to_string(), "c2".to_string()]);

        let d = queue.fetch(names::INTAKE).await.unwrap().unwrap();
        let intake: IntakeMessage = d.parse().unwrap();
        assert!(intake.task.starts_with("task b"));
        assert_eq!(intake.source, "requeue");
        assert_eq!(intake.topic, "demo");
    }

    #[tokio::test]
    async fn empty_store_requeues_zero() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        assert_eq!(requeue_blocked(&store, &queue).await.unwrap(), 0);
        assert_eq!(queue.len(names::INTAKE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_driven_by_blocked_not_next_steps() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        // Task still has pending next steps but also blocked items: requeued.
        tasks::write_task_state(&store, "t1", &state("half done", true)).await.unwrap();

        let count = requeue_blocked(&store, &queue).await.unwrap();
        assert_eq!(count, 1);
    }
}
