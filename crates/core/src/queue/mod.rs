//! Durable, ordered work queues with at-least-once delivery.
//!
//! A fetched message stays in-flight until acked (done) or nacked (back to
//! ready, or dropped for poison input). Consumers hold at most one in-flight
//! message at a time; that single-delivery-in-flight property is what
//! serializes writes to any given task record.

use async_trait::async_trait;

use crate::error::PipelineError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

/// Queue names. Everything flows through these seven channels.
pub mod names {
    pub const INTAKE: &str = "convoy.intake";
    pub const STEPS: &str = "convoy.steps";
    pub const RESULTS_WORKED: &str = "convoy.results.worked";
    pub const RESULTS_FAILED: &str = "convoy.results.failed";
    pub const CAPABILITY_PROPOSALS: &str = "convoy.capability.proposals";
    pub const HUMAN_TODO: &str = "convoy.human.todo";
    pub const EXECUTE_NOW: &str = "convoy.execute.now";
    pub const SCHEDULE_UPDATES: &str = "convoy.schedule.updates";
}

/// A claimed message. `id` is the delivery tag for ack/nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub payload: serde_json::Value,
    pub attempts: i32,
}

impl Delivery {
    /// Deserialize the payload; Malformed on mismatch (nack without requeue).
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, PipelineError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Append a message to the queue (durable for persistent backends).
    async fn publish(&self, queue: &str, payload: serde_json::Value)
    -> Result<(), PipelineError>;

    /// Claim the oldest ready message, moving it in-flight. `None` when empty.
    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, PipelineError>;

    /// Acknowledge a delivery: the message is done and removed.
    async fn ack(&self, queue: &str, id: i64) -> Result<(), PipelineError>;

    /// Negative-acknowledge: `requeue` returns the message to ready (attempts
    /// incremented); otherwise it is dropped as poison.
    async fn nack(&self, queue: &str, id: i64, requeue: bool) -> Result<(), PipelineError>;

    /// Count of ready messages.
    async fn len(&self, queue: &str) -> Result<u64, PipelineError>;

    /// Return messages stuck in-flight longer than `older_than_secs` to ready.
    /// Called once at consumer startup to recover from a crashed worker.
    async fn reclaim(&self, _queue: &str, _older_than_secs: i64) -> Result<u64, PipelineError> {
        Ok(0)
    }
}

/// Publish a serializable message.
pub async fn publish_typed<T: serde::Serialize>(
    queue: &dyn Queue,
    name: &str,
    message: &T,
) -> Result<(), PipelineError> {
    queue
        .publish(name, serde_json::to_value(message).map_err(|e| PipelineError::Queue(e.to_string()))?)
        .await
}
