use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A step the planner determined cannot run with current capabilities, plus why.
/// Always attached to a task; deduplicated by `(task, reason)` when aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockedItem {
    pub task: String,
    pub reason: String,
}

/// A completed step with its result, kept on the task record for continuity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub index: u32,
    pub step: String,
    pub result: String,
}

/// Per-task state record, stored at `task:{id}`.
///
/// Invariant: a step index lives in exactly one of `next_steps` (by position,
/// 1-based) or `previous_steps` at any time. `complete_step` is the only
/// mutation path and preserves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub context: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub previous_steps: Vec<StepEntry>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<BlockedItem>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(
        context: impl Into<String>,
        topic: impl Into<String>,
        order: Option<i64>,
        next_steps: Vec<String>,
        blocked: Vec<BlockedItem>,
    ) -> Self {
        Self {
            context: context.into(),
            topic: topic.into(),
            order,
            previous_steps: Vec::new(),
            next_steps,
            blocked,
            updated_at: Utc::now(),
        }
    }

    /// Move a step from `next_steps` to `previous_steps`, attaching its result.
    ///
    /// Step indices are 1-based positions in the originally planned list.
    /// Idempotent under queue redelivery: completing an index that is already
    /// in `previous_steps` is a no-op and returns false.
    pub fn complete_step(&mut self, index: u32, step: &str, result: &str) -> bool {
        if self.previous_steps.iter().any(|p| p.index == index) {
            return false;
        }
        // Remove by text; duplicate step texts fall back to removing one entry.
        if let Some(pos) = self.next_steps.iter().position(|s| s == step) {
            self.next_steps.remove(pos);
        }
        self.previous_steps.push(StepEntry {
            index,
            step: step.to_owned(),
            result: result.to_owned(),
        });
        self.updated_at = Utc::now();
        true
    }

    pub fn has_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }
}

/// Deduplicate blocked items by `(task, reason)`, preserving first-seen order.
/// Idempotent: aggregating the same source twice yields the same set.
pub fn dedupe_blocked(items: impl IntoIterator<Item = BlockedItem>) -> Vec<BlockedItem> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    items
        .into_iter()
        .filter(|b| seen.insert((b.task.clone(), b.reason.clone())))
        .collect()
}

// ── Queue message shapes ────────────────────────────────────────

/// Raw task request on the intake queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeMessage {
    pub task: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub order: Option<i64>,
    pub source: String,
}

/// One executable step, published by the planner stage.
/// Task fields are denormalized so the executor can start without a store read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMessage {
    pub task_id: Uuid,
    pub step_index: u32,
    pub step: String,
    pub task: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub order: Option<i64>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Step outcome, published to the worked or failed results queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeMessage {
    pub task_id: Uuid,
    pub step_index: u32,
    pub step: String,
    pub result: String,
    /// Present only on the failed channel; result text truncated to a bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_preview: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Capability-build instruction for the proposal queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalMessage {
    pub task: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub blocked_context: Vec<BlockedItem>,
    pub source: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
}

/// Structured todo for items that need a human, published to the escalation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanTodoMessage {
    pub task: String,
    pub reason: String,
    pub context: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

// ── Capability types ────────────────────────────────────────────

/// Lightweight capability advertised to the planner for step generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub constraints: String,
}

/// Rich capability description, injected verbatim into executor context.
/// Stored at `skill:{id}` and indexed in `skills:index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub addresses_blocked: Vec<BlockedItem>,
    pub updated_at: DateTime<Utc>,
}

// ── Scheduler types ─────────────────────────────────────────────

/// Lifecycle state of a schedulable work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    Ready,
    Paused,
}

/// A standalone schedulable unit, stored at `workitem:{id}`.
/// Its cron expression (if any) lives at `schedule:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub description: String,
    pub state: WorkItemState,
}

impl WorkItem {
    pub fn is_ready(&self) -> bool {
        self.state == WorkItemState::Ready
    }
}

/// Per-run result summary, recorded at `runs:{item_id}:{run_ts}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub item_id: String,
    pub run_id: Uuid,
    pub success: bool,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
