//! Per-attempt timeout and transient-error retry with jittered backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Enforced per attempt. A timeout is never retried — the unit of work is
    /// deemed too slow, not transient.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

/// Run a future under a timeout, mapping elapsed time to `Timeout`.
pub async fn run_with_timeout<T, F>(fut: F, timeout: Duration) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { secs: timeout.as_secs() }),
    }
}

/// Run `f` under the policy: per-attempt timeout, transient errors retried
/// with exponential backoff, everything else propagated on first occurrence.
///
/// Backoff: `min(backoff_min * 2^(attempt-1), backoff_max)`, then multiplied
/// by a uniform random factor in `[0.5, 1.0)` so racing workers desynchronize.
pub async fn run_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut last: Option<PipelineError> = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match run_with_timeout(f(), policy.timeout).await {
            Ok(value) => return Ok(value),
            Err(e @ PipelineError::Timeout { .. }) => return Err(e),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "transient failure"
                );
                last = Some(e);
                if attempt < policy.max_attempts {
                    let delay = backoff_delay(policy, attempt);
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(PipelineError::RetriesExhausted {
        attempts: policy.max_attempts,
        last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".into()),
    })
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.backoff_min.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(policy.backoff_max.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.5..1.0);
    Duration::from_secs_f64(capped * jitter)
}
