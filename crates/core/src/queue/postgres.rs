//! Postgres-backed queue over the `queue_messages` table.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never receive
//! the same ready message; a claimed row stays `inflight` until acked or
//! nacked. Crashed workers leave inflight rows behind, recovered by `reclaim`.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Delivery, Queue};
use crate::error::PipelineError;

pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn publish(
        &self,
        queue: &str,
        payload: serde_json::Value,
    ) -> Result<(), PipelineError> {
        sqlx::query("INSERT INTO queue_messages (queue, payload) VALUES ($1, $2)")
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, PipelineError> {
        let row: Option<(i64, serde_json::Value, i32)> = sqlx::query_as(
            "UPDATE queue_messages SET state = 'inflight', locked_at = now()
             WHERE id = (
                 SELECT id FROM queue_messages
                 WHERE queue = $1 AND state = 'ready'
                 ORDER BY id
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, attempts",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, payload, attempts)| Delivery { id, payload, attempts }))
    }

    async fn ack(&self, _queue: &str, id: i64) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND state = 'inflight'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, _queue: &str, id: i64, requeue: bool) -> Result<(), PipelineError> {
        if requeue {
            sqlx::query(
                "UPDATE queue_messages
                 SET state = 'ready', attempts = attempts + 1, locked_at = NULL
                 WHERE id = $1 AND state = 'inflight'",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE queue_messages SET state = 'dead' WHERE id = $1 AND state = 'inflight'",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<u64, PipelineError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM queue_messages WHERE queue = $1 AND state = 'ready'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn reclaim(&self, queue: &str, older_than_secs: i64) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            "UPDATE queue_messages
             SET state = 'ready', attempts = attempts + 1, locked_at = NULL
             WHERE queue = $1 AND state = 'inflight'
               AND locked_at < now() - make_interval(secs => $2::double precision)",
        )
        .bind(queue)
        .bind(older_than_secs as f64)
        .execute(&self.pool)
        .await?;
        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::info!(queue, reclaimed, "reclaimed stale inflight messages");
        }
        Ok(reclaimed)
    }
}
