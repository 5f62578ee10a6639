//! Capability build boundary.
//!
//! Building is opaque to the pipeline: automated codegen, an agent loop, or a
//! person at a keyboard — whatever runs, it is expected to emit a capability
//! descriptor that the feedback stage registers. The stub builder shortcuts
//! the whole process by deriving a descriptor from the classified failure,
//! which is enough to make the next planning pass see the capability.

use async_trait::async_trait;

use super::plan::FeedbackItem;
use super::slugify;
use crate::error::PipelineError;
use crate::types::BlockedItem;

/// What a completed build hands back for registration.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub constraints: String,
    pub skill_content: String,
    pub addresses_blocked: Vec<BlockedItem>,
}

#[async_trait]
pub trait CapabilityBuilder: Send + Sync {
    fn name(&self) -> &str;

    async fn build(
        &self,
        item: &FeedbackItem,
        blocked_context: &[BlockedItem],
    ) -> Result<CapabilityDescriptor, PipelineError>;
}

/// Registers placeholder capabilities without generating any code.
pub struct StubBuilder;

#[async_trait]
impl CapabilityBuilder for StubBuilder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn build(
        &self,
        item: &FeedbackItem,
        blocked_context: &[BlockedItem],
    ) -> Result<CapabilityDescriptor, PipelineError> {
        let source = if item.tool_name.trim().is_empty() {
            &item.step_preview
        } else {
            &item.tool_name
        };
        let slug = slugify(source);
        let name = slug.replace('-', " ");
        let description = if item.tool_description.trim().is_empty() {
            format!("Tool for: {}", truncate_chars(&item.step_preview, 80))
        } else {
            item.tool_description.trim().to_owned()
        };
        let constraints = if item.tool_constraint.trim().is_empty() {
            "Added by the feedback stage; replace when a real implementation ships.".to_owned()
        } else {
            item.tool_constraint.trim().to_owned()
        };

        Ok(CapabilityDescriptor {
            name,
            description,
            constraints,
            skill_content: "# Skill added by the feedback stage. Replace with a real implementation.".to_owned(),
            addresses_blocked: blocked_context.iter().take(3).cloned().collect(),
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
