//! Capability registry operations.
//!
//! Tools (`tools:available`) are advertised to the planner; skills
//! (`skills:index` + `skill:{id}`) are injected into executor context.
//! The feedback stage is the single writer; planner and executor only read.
//! Entries are append-only in normal operation.

use super::{Store, get_typed, keys, set_typed};
use crate::error::PipelineError;
use crate::types::{Skill, Tool};

/// Current tool list. Missing key means no tools yet.
pub async fn available_tools(store: &dyn Store) -> Result<Vec<Tool>, PipelineError> {
    Ok(get_typed(store, keys::TOOLS_KEY).await?.unwrap_or_default())
}

/// Replace the whole tool list (seeding).
pub async fn set_tools(store: &dyn Store, tools: &[Tool]) -> Result<(), PipelineError> {
    set_typed(store, keys::TOOLS_KEY, &tools).await
}

/// Append one tool. Whole-record read-modify-write; duplicate names are kept
/// (the list is advisory prompt context, not an index).
pub async fn append_tool(store: &dyn Store, tool: Tool) -> Result<(), PipelineError> {
    let mut tools = available_tools(store).await?;
    let name = tool.name.clone();
    tools.push(tool);
    set_tools(store, &tools).await?;
    tracing::info!(tool = %name, "appended tool to registry");
    Ok(())
}

/// All registered skill ids.
pub async fn list_skills(store: &dyn Store) -> Result<Vec<String>, PipelineError> {
    Ok(get_typed(store, keys::SKILLS_INDEX_KEY).await?.unwrap_or_default())
}

/// Load one skill by id.
pub async fn get_skill(store: &dyn Store, id: &str) -> Result<Option<Skill>, PipelineError> {
    get_typed(store, &keys::skill(id)).await
}

/// Write a skill record and add its id to the index (if new).
/// Re-registering an existing id overwrites the record in place.
pub async fn register_skill(store: &dyn Store, skill: &Skill) -> Result<(), PipelineError> {
    set_typed(store, &keys::skill(&skill.id), skill).await?;
    let mut ids = list_skills(store).await?;
    if !ids.contains(&skill.id) {
        ids.push(skill.id.clone());
        set_typed(store, keys::SKILLS_INDEX_KEY, &ids).await?;
    }
    tracing::info!(skill = %skill.id, "registered skill");
    Ok(())
}
