use convoy_llm::provider::LlmError;

/// Pipeline error taxonomy.
///
/// The split that matters operationally is transient vs everything else:
/// transient errors are retried (by the retry policy) or redelivered (by a
/// queue nack), non-transient errors propagate on first occurrence. Timeouts
/// are their own kind and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Connection/IO-class failure expected to resolve on retry.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Per-attempt timeout. Surfaced immediately, never retried.
    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Retry budget exhausted. Carries the attempt count and last underlying error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Unparseable payload or collaborator response. Retrying would never succeed.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Referenced task/capability/schedule is absent. Logged, operation skipped.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(String),
}

impl PipelineError {
    /// True for failures worth retrying or redelivering.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Store(_) | Self::Queue(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        // Collaborator call failures are infrastructure faults from the
        // pipeline's perspective; the queue redelivers and we try again.
        Self::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
