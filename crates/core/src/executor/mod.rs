//! Execution stage: consumes one step at a time, runs it against the runner
//! collaborator with task + skill context, classifies the result, updates task
//! state, and republishes the outcome.

mod classify;
mod context;
mod runner;
mod worker;

pub use classify::result_worked;
pub use context::{build_skills_context, build_step_context};
pub use runner::{LlmRunner, ProcessRunner, Runner};
pub use worker::{ExecutionStage, StepOutcome};
