//! In-memory queue for tests and the ephemeral mode.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{Delivery, Queue};
use crate::error::PipelineError;

#[derive(Default)]
struct Channel {
    ready: VecDeque<(i64, serde_json::Value, i32)>,
    inflight: HashMap<i64, (serde_json::Value, i32)>,
}

#[derive(Default)]
pub struct MemoryQueue {
    next_id: Mutex<i64>,
    channels: Mutex<HashMap<String, Channel>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(
        &self,
        queue: &str,
        payload: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
            *next += 1;
            *next
        };
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.entry(queue.to_owned()).or_default().ready.push_back((id, payload, 0));
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, PipelineError> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let channel = channels.entry(queue.to_owned()).or_default();
        match channel.ready.pop_front() {
            Some((id, payload, attempts)) => {
                channel.inflight.insert(id, (payload.clone(), attempts));
                Ok(Some(Delivery { id, payload, attempts }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, queue: &str, id: i64) -> Result<(), PipelineError> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let channel = channels.entry(queue.to_owned()).or_default();
        if channel.inflight.remove(&id).is_none() {
            return Err(PipelineError::Queue(format!("ack of unknown delivery {id}")));
        }
        Ok(())
    }

    async fn nack(&self, queue: &str, id: i64, requeue: bool) -> Result<(), PipelineError> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let channel = channels.entry(queue.to_owned()).or_default();
        let Some((payload, attempts)) = channel.inflight.remove(&id) else {
            return Err(PipelineError::Queue(format!("nack of unknown delivery {id}")));
        };
        if requeue {
            // Redelivered at the front so ordering is preserved for the next consumer.
            channel.ready.push_front((id, payload, attempts + 1));
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<u64, PipelineError> {
        let channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        Ok(channels.get(queue).map(|c| c.ready.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fifo_delivery() {
        let q = MemoryQueue::new();
        q.publish("steps", json!({"n": 1})).await.unwrap();
        q.publish("steps", json!({"n": 2})).await.unwrap();

        let first = q.fetch("steps").await.unwrap().unwrap();
        assert_eq!(first.payload, json!({"n": 1}));
        q.ack("steps", first.id).await.unwrap();

        let second = q.fetch("steps").await.unwrap().unwrap();
        assert_eq!(second.payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn nack_requeue_redelivers_with_attempt_count() {
        let q = MemoryQueue::new();
        q.publish("steps", json!({"n": 1})).await.unwrap();

        let d = q.fetch("steps").await.unwrap().unwrap();
        assert_eq!(d.attempts, 0);
        q.nack("steps", d.id, true).await.unwrap();

        let redelivered = q.fetch("steps").await.unwrap().unwrap();
        assert_eq!(redelivered.payload, json!({"n": 1}));
        assert_eq!(redelivered.attempts, 1);
    }

    #[tokio::test]
    async fn nack_drop_discards() {
        let q = MemoryQueue::new();
        q.publish("steps", json!("poison")).await.unwrap();

        let d = q.fetch("steps").await.unwrap().unwrap();
        q.nack("steps", d.id, false).await.unwrap();

        assert!(q.fetch("steps").await.unwrap().is_none());
        assert_eq!(q.len("steps").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn inflight_not_visible_to_other_fetches() {
        let q = MemoryQueue::new();
        q.publish("steps", json!(1)).await.unwrap();

        let _held = q.fetch("steps").await.unwrap().unwrap();
        assert!(q.fetch("steps").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_empty_is_none() {
        let q = MemoryQueue::new();
        assert!(q.fetch("nothing").await.unwrap().is_none());
    }
}
