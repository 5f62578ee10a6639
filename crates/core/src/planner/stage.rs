use std::sync::Arc;

use chrono::Utc;
use convoy_llm::provider::{CompletionRequest, LlmProvider};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{parse_twofold, plan_messages};
use crate::config::Cfg;
use crate::error::PipelineError;
use crate::queue::{Queue, names, publish_typed};
use crate::retry::run_with_timeout;
use crate::store::{Store, registry, tasks};
use crate::types::{IntakeMessage, StepMessage, TaskState};

/// Result of planning one intake request.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub task_id: Uuid,
    pub steps_published: usize,
    pub blocked_count: usize,
}

/// Consumes intake requests one at a time and turns each into task state plus
/// published step messages.
pub struct PlannerStage {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    llm: Arc<dyn LlmProvider>,
    cfg: Cfg,
}

impl PlannerStage {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        llm: Arc<dyn LlmProvider>,
        cfg: Cfg,
    ) -> Self {
        Self { store, queue, llm, cfg }
    }

    /// Plan a single intake request. Returns `None` when the request carries
    /// no task text (acked and skipped).
    pub async fn plan_one(
        &self,
        intake: &IntakeMessage,
    ) -> Result<Option<PlanOutcome>, PipelineError> {
        let task_text = intake.task.trim();
        if task_text.is_empty() {
            tracing::warn!(source = %intake.source, "empty intake task, skipping");
            return Ok(None);
        }

        // Tools are re-read per request so capabilities registered mid-cycle
        // shape the very next plan.
        let tools = registry::available_tools(self.store.as_ref()).await?;
        let messages = plan_messages(task_text, &intake.topic, &tools);

        let request = CompletionRequest {
            messages,
            max_tokens: self.cfg.llm_max_tokens,
            temperature: self.cfg.llm_temperature,
        };
        let response = run_with_timeout(
            async { self.llm.complete(request).await.map_err(PipelineError::from) },
            self.cfg.planner_timeout(),
        )
        .await?;

        let plan = parse_twofold(&response.content);
        let task_id = Uuid::new_v4();

        // Publish in response order; later steps may assume earlier ones ran.
        for (i, step) in plan.next_steps.iter().enumerate() {
            let msg = StepMessage {
                task_id,
                step_index: (i + 1) as u32,
                step: step.clone(),
                task: task_text.to_owned(),
                topic: intake.topic.clone(),
                order: intake.order,
                source: "planner".into(),
                created_at: Utc::now(),
            };
            publish_typed(self.queue.as_ref(), names::STEPS, &msg).await?;
        }

        let state = TaskState::new(
            task_text,
            intake.topic.clone(),
            intake.order,
            plan.next_steps.clone(),
            plan.blocked.clone(),
        );
        let id = task_id.to_string();
        tasks::write_task_state(self.store.as_ref(), &id, &state).await?;
        tasks::write_blocked_only(self.store.as_ref(), &id, &plan.blocked).await?;

        tracing::info!(
            task_id = %task_id,
            steps = plan.next_steps.len(),
            blocked = plan.blocked.len(),
            topic = %intake.topic,
            "planned task"
        );

        Ok(Some(PlanOutcome {
            task_id,
            steps_published: plan.next_steps.len(),
            blocked_count: plan.blocked.len(),
        }))
    }

    /// Daemon loop: fetch → plan → ack, with nack semantics per error class.
    pub async fn run(&self, token: CancellationToken) {
        if let Err(e) = self.queue.reclaim(names::INTAKE, self.cfg.reclaim_after_secs).await {
            tracing::warn!(error = %e, "intake reclaim failed");
        }
        tracing::info!("planner stage started");

        loop {
            if token.is_cancelled() {
                break;
            }
            let delivery = match self.queue.fetch(names::INTAKE).await {
                Ok(Some(d)) => d,
                Ok(None) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.idle_poll()) => continue,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "intake fetch failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.idle_poll()) => continue,
                    }
                }
            };

            let outcome = match delivery.parse::<IntakeMessage>() {
                Ok(intake) => self.plan_one(&intake).await.map(|_| ()),
                Err(e) => Err(e),
            };

            let result = match outcome {
                Ok(()) => self.queue.ack(names::INTAKE, delivery.id).await,
                Err(PipelineError::Malformed(reason)) => {
                    tracing::error!(%reason, "dropping unparseable intake message");
                    self.queue.nack(names::INTAKE, delivery.id, false).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempts = delivery.attempts, "planning failed, redelivering");
                    self.queue.nack(names::INTAKE, delivery.id, true).await
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "intake ack/nack failed");
            }
        }

        tracing::info!("planner stage stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use convoy_llm::provider::MockProvider;

    fn stage_with(response: &str) -> PlannerStage {
        PlannerStage::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(MockProvider::new(response)),
            Cfg::default(),
        )
    }

    fn intake(task: &str) -> IntakeMessage {
        IntakeMessage {
            task: task.into(),
            topic: "demo".into(),
            order: Some(1),
            source: "test".into(),
        }
    }

    #[tokio::test]
    async fn plan_publishes_steps_in_order_and_writes_state() {
        let stage = stage_with(
            r#"{"next_tasks": ["do A", "do B"], "blocked_tasks": [{"task": "do C", "reason": "no tool"}]}"#,
        );

        let outcome = stage.plan_one(&intake("Build X")).await.unwrap().unwrap();
        assert_eq!(outcome.steps_published, 2);
        assert_eq!(outcome.blocked_count, 1);

        let first = stage.queue.fetch(names::STEPS).await.unwrap().unwrap();
        let step: StepMessage = first.parse().unwrap();
        assert_eq!(step.step, "do A");
        assert_eq!(step.step_index, 1);
        assert_eq!(step.task, "Build X");
        stage.queue.ack(names::STEPS, first.id).await.unwrap();

        let second = stage.queue.fetch(names::STEPS).await.unwrap().unwrap();
        let step: StepMessage = second.parse().unwrap();
        assert_eq!(step.step, "do B");
        assert_eq!(step.step_index, 2);

        let state = tasks::get_task_state(stage.store.as_ref(), &outcome.task_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.next_steps, vec!["do A".to_string(), "do B".to_string()]);
        assert_eq!(state.blocked.len(), 1);
        assert!(state.previous_steps.is_empty());
    }

    #[tokio::test]
    async fn unparseable_response_degrades_to_single_step() {
        let stage = stage_with("browse the site and write a summary");

        let outcome = stage.plan_one(&intake("Build X")).await.unwrap().unwrap();
        assert_eq!(outcome.steps_published, 1);
        assert_eq!(outcome.blocked_count, 0);

        let d = stage.queue.fetch(names::STEPS).await.unwrap().unwrap();
        let step: StepMessage = d.parse().unwrap();
        assert_eq!(step.step, "browse the site and write a summary");
    }

    #[tokio::test]
    async fn empty_task_is_skipped() {
        let stage = stage_with("{}");
        let outcome = stage.plan_one(&intake("   ")).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(stage.queue.len(names::STEPS).await.unwrap(), 0);
    }
}
