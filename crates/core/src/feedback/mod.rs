//! Feedback stage: turns blocked items and failed outcomes into new
//! capabilities (or human escalations), closing the convergence loop.

mod builder;
mod plan;
mod stage;

pub use builder::{CapabilityBuilder, CapabilityDescriptor, StubBuilder};
pub use plan::{FeedbackAction, FeedbackItem, FeedbackPlan, parse_instruction_lines, parse_plan};
pub use stage::{FeedbackReport, FeedbackStage};

/// Derive a filesystem-safe slug from a capability name
/// (e.g. "HubSpot Sync agent" -> "hubspot-sync-agent").
pub fn slugify(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    let slug: String = cleaned.split_whitespace().take(5).collect::<Vec<_>>().join("-");
    let slug: String = slug.chars().take(40).collect();
    let slug = slug.trim_end_matches('-').to_owned();
    if slug.is_empty() { "tool".to_owned() } else { slug }
}
