use std::sync::Arc;

use chrono::Utc;
use convoy_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

use super::builder::CapabilityBuilder;
use super::plan::{FeedbackAction, parse_instruction_lines, parse_plan};
use super::slugify;
use crate::config::Cfg;
use crate::error::PipelineError;
use crate::queue::{Queue, names, publish_typed};
use crate::retry::run_with_timeout;
use crate::store::{Store, registry, tasks};
use crate::types::{
    BlockedItem, HumanTodoMessage, OutcomeMessage, ProposalMessage, Skill, Tool,
};

const PROPOSAL_SYSTEM: &str = "You are a capability planner for an execution pipeline. You receive a list of blocked tasks (steps that could not run) with reasons. Output 3-5 clear build instructions, one per line, describing exactly what tool or capability to build so the blocked tasks can run next cycle.\n\nFormat (no preamble, one instruction per line):\nDo this first: [one clear build instruction]\nDo this next: [one clear build instruction]";

const CLASSIFY_SYSTEM: &str = r#"You are a feedback agent. You receive a list of executor step failures (what didn't work).
For each failure, decide:
- build_tool: a practical tool/skill can be added (a script, API wrapper, or automation) so this succeeds next time.
- human_todo: this needs a human (API keys, legal approval, custom work, or unclear requirements).

Output only valid JSON (no markdown, no explanation) with this exact shape:
{
  "summary": "2-4 sentence summary of what didn't work and why.",
  "items": [
    {
      "step_preview": "short step description",
      "error_preview": "short error",
      "action": "build_tool" or "human_todo",
      "tool_name": "slug-name (only if build_tool)",
      "tool_description": "one sentence (only if build_tool)",
      "tool_constraint": "one sentence constraint (only if build_tool)",
      "human_task": "what a human should do (only if human_todo)",
      "human_reason": "why this cannot be automated (only if human_todo)"
    }
  ]
}
Every item must have action, step_preview, error_preview."#;

/// Result of one feedback cycle.
#[derive(Debug, Clone, Default)]
pub struct FeedbackReport {
    pub proposals_published: usize,
    pub built_count: usize,
    pub human_todo_count: usize,
    pub built_capability_ids: Vec<String>,
}

pub struct FeedbackStage {
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
    llm: Arc<dyn LlmProvider>,
    builder: Arc<dyn CapabilityBuilder>,
    cfg: Cfg,
}

impl FeedbackStage {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        llm: Arc<dyn LlmProvider>,
        builder: Arc<dyn CapabilityBuilder>,
        cfg: Cfg,
    ) -> Self {
        Self { store, queue, llm, builder, cfg }
    }

    /// One full feedback cycle: propose capabilities for aggregated blocked
    /// items, then drain and classify failed outcomes into built capabilities
    /// and human escalations.
    pub async fn run_cycle(&self) -> Result<FeedbackReport, PipelineError> {
        let mut report = FeedbackReport::default();

        let blocked = tasks::aggregate_blocked(self.store.as_ref()).await?;
        if blocked.is_empty() {
            tracing::info!("no blocked items to propose capabilities for");
        } else {
            report.proposals_published = self.propose_capabilities(&blocked).await?;
        }

        let failures = self.drain_failures().await?;
        if failures.is_empty() {
            tracing::info!("no failed outcomes to classify");
            return Ok(report);
        }
        let (built, human, ids) = self.process_failures(&failures, &blocked).await?;
        report.built_count = built;
        report.human_todo_count = human;
        report.built_capability_ids = ids;

        tracing::info!(
            proposals = report.proposals_published,
            built = report.built_count,
            human_todo = report.human_todo_count,
            "feedback cycle complete"
        );
        Ok(report)
    }

    /// Ask the collaborator for build instructions and publish each to the
    /// capability-proposal channel. Parse failures degrade to zero proposals.
    async fn propose_capabilities(
        &self,
        blocked: &[BlockedItem],
    ) -> Result<usize, PipelineError> {
        let snapshot: String = blocked
            .iter()
            .map(|b| format!("- Blocked: {} | Reason: {}", b.task, b.reason))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(PROPOSAL_SYSTEM),
                ChatMessage::user(format!(
                    "BLOCKED TASKS:\n\n{snapshot}\n\nOutput 3-5 build instructions in the required format."
                )),
            ],
            max_tokens: self.cfg.llm_max_tokens,
            temperature: self.cfg.llm_temperature,
        };
        let response = run_with_timeout(
            async { self.llm.complete(request).await.map_err(PipelineError::from) },
            self.cfg.planner_timeout(),
        )
        .await?;

        let instructions = parse_instruction_lines(&response.content);
        for instruction in &instructions {
            let msg = ProposalMessage {
                task: instruction.clone(),
                topic: String::new(),
                blocked_context: blocked.to_vec(),
                source: "feedback".into(),
                format: "capability_instruction".into(),
                created_at: Utc::now(),
            };
            publish_typed(self.queue.as_ref(), names::CAPABILITY_PROPOSALS, &msg).await?;
        }
        tracing::info!(count = instructions.len(), "published capability proposals");
        Ok(instructions.len())
    }

    /// Drain the failed-outcome channel up to the configured cap.
    /// Unparseable messages are dropped; drained messages are acked — the
    /// feedback stage owns them from here.
    async fn drain_failures(&self) -> Result<Vec<OutcomeMessage>, PipelineError> {
        let mut failures = Vec::new();
        while failures.len() < self.cfg.feedback_drain_cap {
            let Some(delivery) = self.queue.fetch(names::RESULTS_FAILED).await? else {
                break;
            };
            match delivery.parse::<OutcomeMessage>() {
                Ok(outcome) => {
                    failures.push(outcome);
                    self.queue.ack(names::RESULTS_FAILED, delivery.id).await?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unparseable failed outcome");
                    self.queue.nack(names::RESULTS_FAILED, delivery.id, false).await?;
                }
            }
        }
        Ok(failures)
    }

    /// Classify drained failures and act on each: build + register, or escalate.
    async fn process_failures(
        &self,
        failures: &[OutcomeMessage],
        blocked_context: &[BlockedItem],
    ) -> Result<(usize, usize, Vec<String>), PipelineError> {
        let blob: String = failures
            .iter()
            .enumerate()
            .map(|(i, f)| {
                format!(
                    "{}. Step: {}\n   Error: {}",
                    i + 1,
                    truncate_chars(&f.step, 120),
                    truncate_chars(f.error_preview.as_deref().unwrap_or(&f.result), 200),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(CLASSIFY_SYSTEM),
                ChatMessage::user(format!(
                    "FAILED EXECUTOR STEPS:\n\n{blob}\n\nOutput the JSON plan."
                )),
            ],
            max_tokens: self.cfg.llm_max_tokens,
            temperature: self.cfg.llm_temperature,
        };
        let response = run_with_timeout(
            async { self.llm.complete(request).await.map_err(PipelineError::from) },
            self.cfg.planner_timeout(),
        )
        .await?;

        let plan = parse_plan(&response.content);
        if !plan.summary.is_empty() {
            tracing::info!(summary = %truncate_chars(&plan.summary, 200), "failure summary");
        }

        let mut built_ids = Vec::new();
        let mut human_count = 0usize;

        for item in &plan.items {
            match item.action {
                FeedbackAction::BuildTool => {
                    let descriptor = match self.builder.build(item, blocked_context).await {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::warn!(error = %e, builder = self.builder.name(), "capability build failed");
                            continue;
                        }
                    };
                    let slug = slugify(&descriptor.name);
                    registry::append_tool(
                        self.store.as_ref(),
                        Tool {
                            name: slug.clone(),
                            description: descriptor.description.clone(),
                            constraints: descriptor.constraints.clone(),
                        },
                    )
                    .await?;
                    registry::register_skill(
                        self.store.as_ref(),
                        &Skill {
                            id: slug.clone(),
                            name: descriptor.name.clone(),
                            description: descriptor.description,
                            content: descriptor.skill_content,
                            addresses_blocked: descriptor.addresses_blocked,
                            updated_at: Utc::now(),
                        },
                    )
                    .await?;
                    built_ids.push(slug);
                }
                FeedbackAction::HumanTodo => {
                    let task = non_empty_or(&item.human_task, &item.step_preview, "Review failed step");
                    let reason =
                        non_empty_or(&item.human_reason, &item.error_preview, "Could not automate.");
                    let msg = HumanTodoMessage {
                        task,
                        reason,
                        context: truncate_chars(
                            &format!("{}\n{}", item.step_preview, item.error_preview),
                            500,
                        ),
                        source: "feedback".into(),
                        created_at: Utc::now(),
                    };
                    publish_typed(self.queue.as_ref(), names::HUMAN_TODO, &msg).await?;
                    tracing::info!(task = %truncate_chars(&msg.task, 60), "published human todo");
                    human_count += 1;
                }
            }
        }

        Ok((built_ids.len(), human_count, built_ids))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}

fn non_empty_or(primary: &str, secondary: &str, fallback: &str) -> String {
    let p = primary.trim();
    if !p.is_empty() {
        return p.to_owned();
    }
    let s = secondary.trim();
    if !s.is_empty() {
        return s.to_owned();
    }
    fallback.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::StubBuilder;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use crate::types::TaskState;
    use convoy_llm::provider::MockProvider;
    use uuid::Uuid;

    fn failed_outcome(step: &str, error: &str) -> OutcomeMessage {
        OutcomeMessage {
            task_id: Uuid::new_v4(),
            step_index: 1,
            step: step.into(),
            result: error.into(),
            error_preview: Some(error.into()),
            source: "executor".into(),
            created_at: Utc::now(),
        }
    }

    async fn seed_blocked_task(store: &MemoryStore) {
        let state = TaskState::new(
            "Build X",
            "demo",
            None,
            vec![],
            vec![BlockedItem { task: "scrape listings".into(), reason: "no scraper".into() }],
        );
        tasks::write_task_state(store, "t1", &state).await.unwrap();
    }

    fn classify_response() -> String {
        r#"{
            "summary": "One failure is toolable, one needs a human.",
            "items": [
                {"action": "build_tool", "step_preview": "scrape listings", "error_preview": "no scraper",
                 "tool_name": "list-scraper", "tool_description": "Scrapes list pages.", "tool_constraint": "Public pages only."},
                {"action": "human_todo", "step_preview": "send from corp account", "error_preview": "no credentials",
                 "human_task": "Provision SMTP credentials", "human_reason": "Secrets need a human."}
            ]
        }"#
        .to_owned()
    }

    #[tokio::test]
    async fn full_cycle_builds_and_escalates() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        seed_blocked_task(store.as_ref()).await;

        publish_typed(
            queue.as_ref(),
            names::RESULTS_FAILED,
            &failed_outcome("scrape listings", "error: no scraper tool"),
        )
        .await
        .unwrap();
        publish_typed(
            queue.as_ref(),
            names::RESULTS_FAILED,
            &failed_outcome("send from corp account", "error: no credentials"),
        )
        .await
        .unwrap();

        let llm = MockProvider::with_responses(vec![
            "Do this first: Build a list scraper\nDo this next: Add an email sender".into(),
            classify_response(),
        ]);

        let stage = FeedbackStage::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&queue) as Arc<dyn Queue>,
            Arc::new(llm),
            Arc::new(StubBuilder),
            Cfg::default(),
        );

        let report = stage.run_cycle().await.unwrap();
        assert_eq!(report.proposals_published, 2);
        assert_eq!(report.built_count, 1);
        assert_eq!(report.human_todo_count, 1);
        assert_eq!(report.built_capability_ids, vec!["list-scraper".to_string()]);

        // Tool and skill registered.
        let tools = registry::available_tools(store.as_ref()).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list-scraper");
        let skill = registry::get_skill(store.as_ref(), "list-scraper").await.unwrap().unwrap();
        assert_eq!(skill.addresses_blocked.len(), 1);

        // Proposals and escalation published; failed queue drained.
        assert_eq!(queue.len(names::CAPABILITY_PROPOSALS).await.unwrap(), 2);
        assert_eq!(queue.len(names::HUMAN_TODO).await.unwrap(), 1);
        assert_eq!(queue.len(names::RESULTS_FAILED).await.unwrap(), 0);

        let d = queue.fetch(names::HUMAN_TODO).await.unwrap().unwrap();
        let todo: HumanTodoMessage = d.parse().unwrap();
        assert_eq!(todo.task, "Provision SMTP credentials");
    }

    #[tokio::test]
    async fn unparseable_classification_degrades_to_empty_plan() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());

        publish_typed(queue.as_ref(), names::RESULTS_FAILED, &failed_outcome("x", "error: y"))
            .await
            .unwrap();

        let stage = FeedbackStage::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&queue) as Arc<dyn Queue>,
            Arc::new(MockProvider::new("cannot help with that")),
            Arc::new(StubBuilder),
            Cfg::default(),
        );

        let report = stage.run_cycle().await.unwrap();
        assert_eq!(report.built_count, 0);
        assert_eq!(report.human_todo_count, 0);
        assert_eq!(queue.len(names::HUMAN_TODO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_cycle_is_a_no_op() {
        let stage = FeedbackStage::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
            Arc::new(MockProvider::new("{}")),
            Arc::new(StubBuilder),
            Cfg::default(),
        );
        let report = stage.run_cycle().await.unwrap();
        assert_eq!(report.proposals_published, 0);
        assert_eq!(report.built_count, 0);
    }

    #[tokio::test]
    async fn drain_respects_cap() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..5 {
            publish_typed(
                queue.as_ref(),
                names::RESULTS_FAILED,
                &failed_outcome(&format!("step {i}"), "error: x"),
            )
            .await
            .unwrap();
        }

        let cfg = Cfg { feedback_drain_cap: 3, ..Cfg::default() };
        let stage = FeedbackStage::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&queue) as Arc<dyn Queue>,
            Arc::new(MockProvider::new("no json")),
            Arc::new(StubBuilder),
            cfg,
        );

        let failures = stage.drain_failures().await.unwrap();
        assert_eq!(failures.len(), 3);
        assert_eq!(queue.len(names::RESULTS_FAILED).await.unwrap(), 2);
    }
}
