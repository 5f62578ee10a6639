use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::classify::{result_worked, truncate};
use super::context::build_step_context;
use super::runner::Runner;
use crate::config::Cfg;
use crate::error::PipelineError;
use crate::queue::{Queue, names, publish_typed};
use crate::retry::run_with_timeout;
use crate::store::{Store, tasks};
use crate::types::{OutcomeMessage, StepMessage};

/// What happened to one consumed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Worked,
    Failed,
    /// Empty step text; acked without running anything.
    Skipped,
}

/// One execution worker. A worker pool is N independent instances of this
/// stage, each holding at most one in-flight step message.
pub struct ExecutionStage {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    runner: Arc<dyn Runner>,
    cfg: Cfg,
}

impl ExecutionStage {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        runner: Arc<dyn Runner>,
        cfg: Cfg,
    ) -> Self {
        Self { store, queue, runner, cfg }
    }

    /// Execute one step: build context, invoke the runner under a timeout,
    /// classify, publish the outcome, update task state.
    ///
    /// A runner timeout is a failed outcome, not a redelivery — the step was
    /// too slow, and retrying it would stall the worker again. Hard runner
    /// errors propagate so the caller nacks and the message is redelivered.
    pub async fn execute_one(&self, step: &StepMessage) -> Result<StepOutcome, PipelineError> {
        if step.step.trim().is_empty() {
            tracing::warn!(task_id = %step.task_id, step_index = step.step_index, "empty step, skipping");
            return Ok(StepOutcome::Skipped);
        }

        let context = build_step_context(self.store.as_ref(), step).await?;

        let result = match run_with_timeout(
            self.runner.run(&step.step, &context),
            self.cfg.runner_timeout(),
        )
        .await
        {
            Ok(text) => text,
            Err(PipelineError::Timeout { secs }) => {
                // Abandoned from the pipeline's perspective even if the
                // backend keeps running in the background.
                format!("Runner: execution timed out after {secs}s")
            }
            Err(e) => return Err(e),
        };

        let worked = result_worked(&result);
        self.log_step_outcome(step, &result, worked);

        let outcome = OutcomeMessage {
            task_id: step.task_id,
            step_index: step.step_index,
            step: step.step.clone(),
            result: result.trim().to_owned(),
            error_preview: (!worked)
                .then(|| truncate(&result, self.cfg.error_preview_max_len)),
            source: "executor".into(),
            created_at: Utc::now(),
        };
        let channel = if worked { names::RESULTS_WORKED } else { names::RESULTS_FAILED };
        publish_typed(self.queue.as_ref(), channel, &outcome).await?;

        tasks::update_task_after_step(
            self.store.as_ref(),
            &step.task_id.to_string(),
            step.step_index,
            &step.step,
            result.trim(),
        )
        .await?;

        Ok(if worked { StepOutcome::Worked } else { StepOutcome::Failed })
    }

    fn log_step_outcome(&self, step: &StepMessage, result: &str, worked: bool) {
        let status = if worked { "WORKED" } else { "DID NOT WORK" };
        let result_preview = truncate(result, self.cfg.result_log_max_len);
        tracing::info!(
            task_id = %step.task_id,
            step_index = step.step_index,
            step = %truncate(&step.step, 80),
            result = %result_preview,
            "{status}"
        );
        if !worked {
            tracing::warn!(
                task_id = %step.task_id,
                step_index = step.step_index,
                "step did not work"
            );
        }
    }

    /// Daemon loop: one message in flight at a time, ack after state update +
    /// republish, nack with redelivery on transient faults.
    pub async fn run(&self, token: CancellationToken) {
        if let Err(e) = self.queue.reclaim(names::STEPS, self.cfg.reclaim_after_secs).await {
            tracing::warn!(error = %e, "steps reclaim failed");
        }
        tracing::info!(runner = self.runner.name(), "execution stage started");

        loop {
            if token.is_cancelled() {
                break;
            }
            let delivery = match self.queue.fetch(names::STEPS).await {
                Ok(Some(d)) => d,
                Ok(None) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.idle_poll()) => continue,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "steps fetch failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.idle_poll()) => continue,
                    }
                }
            };

            let outcome = match delivery.parse::<StepMessage>() {
                Ok(step) => self.execute_one(&step).await.map(|_| ()),
                Err(e) => Err(e),
            };

            let result = match outcome {
                Ok(()) => self.queue.ack(names::STEPS, delivery.id).await,
                Err(PipelineError::Malformed(reason)) => {
                    tracing::error!(%reason, "dropping unparseable step message");
                    self.queue.nack(names::STEPS, delivery.id, false).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempts = delivery.attempts, "step execution failed, redelivering");
                    self.queue.nack(names::STEPS, delivery.id, true).await
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "steps ack/nack failed");
            }
        }

        tracing::info!("execution stage stopped");
    }
}
