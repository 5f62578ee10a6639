//! Planner stage: consumes intake requests, asks the planner collaborator for
//! an ordered step list plus blocked items, persists task state, and publishes
//! each step for the execution stage.

mod parse;
mod prompt;
mod stage;

pub use parse::{ParsedPlan, parse_twofold};
pub use prompt::{format_tools_for_prompt, plan_messages};
pub use stage::{PlanOutcome, PlannerStage};
