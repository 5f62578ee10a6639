//! Shared keyed store behind a narrow interface.
//!
//! The task store and the capability registry are both key-value data with a
//! prefix scan; nothing in the pipeline needs more than get/set/delete/scan.
//! Multiple writers exist across processes, so there is no in-process caching:
//! every read goes to the backend.

use async_trait::async_trait;

use crate::error::PipelineError;

pub mod memory;
pub mod postgres;
pub mod registry;
pub mod tasks;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Well-known key prefixes. The key schema is the contract between stages.
pub mod keys {
    pub const TASK_PREFIX: &str = "task:";
    pub const TASK_BLOCKED_SUFFIX: &str = ":blocked";
    pub const TOOLS_KEY: &str = "tools:available";
    pub const SKILLS_INDEX_KEY: &str = "skills:index";
    pub const SKILL_PREFIX: &str = "skill:";
    pub const WORKITEM_PREFIX: &str = "workitem:";
    pub const SCHEDULE_PREFIX: &str = "schedule:";
    pub const METRICS_PREFIX: &str = "metrics:";
    pub const RUN_PREFIX: &str = "runs:";
    pub const CONFIG_PREFIX: &str = "config:";

    pub fn task(id: &str) -> String {
        format!("{TASK_PREFIX}{id}")
    }

    pub fn task_blocked(id: &str) -> String {
        format!("{TASK_PREFIX}{id}{TASK_BLOCKED_SUFFIX}")
    }

    pub fn skill(id: &str) -> String {
        format!("{SKILL_PREFIX}{id}")
    }

    pub fn workitem(id: &str) -> String {
        format!("{WORKITEM_PREFIX}{id}")
    }

    pub fn schedule(id: &str) -> String {
        format!("{SCHEDULE_PREFIX}{id}")
    }

    pub fn metrics(item_id: &str) -> String {
        format!("{METRICS_PREFIX}{item_id}")
    }

    pub fn run(item_id: &str, run_ts: i64) -> String {
        format!("{RUN_PREFIX}{item_id}:{run_ts}")
    }
}

/// Keyed JSON store. Writers perform whole-record read-modify-write; callers
/// serialize concurrent updates to the same key (in practice, the queues'
/// single-delivery-in-flight semantics).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PipelineError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PipelineError>;

    async fn delete(&self, key: &str) -> Result<(), PipelineError>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, PipelineError>;
}

/// Typed get: deserialize the stored JSON, treating a mismatch as Malformed.
pub async fn get_typed<T: serde::de::DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed set.
pub async fn set_typed<T: serde::Serialize>(
    store: &dyn Store,
    key: &str,
    value: &T,
) -> Result<(), PipelineError> {
    store.set(key, serde_json::to_value(value)?).await
}
