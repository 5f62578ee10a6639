//! Execution context assembly.
//!
//! A step runs with: the originating task and topic, the steps already
//! completed (so the runner has continuity), and the full rendered content of
//! every registered skill. Skills are re-read from the registry on every step
//! — capabilities added mid-cycle take effect without redeploying workers.

use crate::error::PipelineError;
use crate::store::{Store, registry, tasks};
use crate::types::StepMessage;

/// Render all registered skills as prompt context. Empty string when none.
pub async fn build_skills_context(store: &dyn Store) -> Result<String, PipelineError> {
    let ids = registry::list_skills(store).await?;
    if ids.is_empty() {
        return Ok(String::new());
    }
    let mut parts = vec!["Available skills (use as needed):".to_owned()];
    for id in ids {
        let Some(skill) = registry::get_skill(store, &id).await? else {
            tracing::warn!(skill = %id, "indexed skill missing, skipping");
            continue;
        };
        parts.push(format!("\n## {}: {}", skill.id, skill.name));
        if !skill.description.trim().is_empty() {
            parts.push(skill.description.trim().to_owned());
        }
        if !skill.content.trim().is_empty() {
            parts.push(skill.content.trim().to_owned());
        }
    }
    Ok(parts.join("\n").trim().to_owned())
}

/// Build the full context string for one step.
pub async fn build_step_context(
    store: &dyn Store,
    step: &StepMessage,
) -> Result<String, PipelineError> {
    let mut parts = Vec::new();
    if !step.task.is_empty() {
        parts.push(format!("Task: {}", step.task));
    }
    if !step.topic.is_empty() {
        parts.push(format!("Topic: {}", step.topic));
    }

    if let Some(state) = tasks::get_task_state(store, &step.task_id.to_string()).await?
        && !state.previous_steps.is_empty()
    {
        parts.push("Steps already done:".to_owned());
        for p in &state.previous_steps {
            parts.push(format!("  - {}", p.step));
        }
    }

    let skills = build_skills_context(store).await?;
    if !skills.is_empty() {
        parts.push(format!("\n{skills}"));
    }

    Ok(parts.join("\n").trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Skill, TaskState};
    use chrono::Utc;
    use uuid::Uuid;

    fn step_msg(task_id: Uuid) -> StepMessage {
        StepMessage {
            task_id,
            step_index: 2,
            step: "do B".into(),
            task: "Build X".into(),
            topic: "demo".into(),
            order: None,
            source: "planner".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn context_includes_task_topic_and_previous_steps() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();
        let mut state =
            TaskState::new("Build X", "demo", None, vec!["do A".into(), "do B".into()], vec![]);
        state.complete_step(1, "do A", "done");
        tasks::write_task_state(&store, &task_id.to_string(), &state).await.unwrap();

        let ctx = build_step_context(&store, &step_msg(task_id)).await.unwrap();
        assert!(ctx.contains("Task: Build X"));
        assert!(ctx.contains("Topic: demo"));
        assert!(ctx.contains("Steps already done:"));
        assert!(ctx.contains("  - do A"));
    }

    #[tokio::test]
    async fn context_without_task_record_still_has_denormalized_fields() {
        let store = MemoryStore::new();
        let ctx = build_step_context(&store, &step_msg(Uuid::new_v4())).await.unwrap();
        assert!(ctx.contains("Task: Build X"));
        assert!(!ctx.contains("Steps already done"));
    }

    #[tokio::test]
    async fn skills_render_with_header_and_content() {
        let store = MemoryStore::new();
        registry::register_skill(
            &store,
            &Skill {
                id: "web-scraper".into(),
                name: "Web Scraper".into(),
                description: "Scrapes list pages.".into(),
                content: "# Usage\nCall with a URL.".into(),
                addresses_blocked: vec![],
                updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let ctx = build_skills_context(&store).await.unwrap();
        assert!(ctx.starts_with("Available skills"));
        assert!(ctx.contains("## web-scraper: Web Scraper"));
        assert!(ctx.contains("Call with a URL."));
    }

    #[tokio::test]
    async fn no_skills_is_empty_context() {
        let store = MemoryStore::new();
        assert!(build_skills_context(&store).await.unwrap().is_empty());
    }
}
