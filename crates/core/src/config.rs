use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::store::{Store, keys};

/// All pipeline parameters. Loaded from `config:*` keys in the store at
/// startup. First boot writes defaults; subsequent boots read existing values.
/// Ephemeral (no-database) runs just use defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfg {
    // collaborator timeouts (seconds)
    pub planner_timeout_secs: u64,
    pub runner_timeout_secs: u64,

    // retry policy for scheduler-driven execution
    pub retry_max_attempts: u32,
    pub retry_backoff_min_secs: f64,
    pub retry_backoff_max_secs: f64,

    // output bounds
    pub error_preview_max_len: usize,
    pub result_log_max_len: usize,

    // scheduler variants
    pub cron_check_interval_secs: u64,
    pub speedrun_interval_secs: u64,
    pub speedrun_max_per_cycle: usize,

    // feedback stage
    pub feedback_drain_cap: usize,

    // consumer loops
    pub idle_poll_interval_ms: u64,
    pub reclaim_after_secs: i64,

    // planner LLM
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            planner_timeout_secs: 120,
            runner_timeout_secs: 300,
            retry_max_attempts: 3,
            retry_backoff_min_secs: 1.0,
            retry_backoff_max_secs: 30.0,
            error_preview_max_len: 500,
            result_log_max_len: 400,
            cron_check_interval_secs: 60,
            speedrun_interval_secs: 5,
            speedrun_max_per_cycle: 3,
            feedback_drain_cap: 25,
            idle_poll_interval_ms: 500,
            reclaim_after_secs: 600,
            llm_max_tokens: 2048,
            llm_temperature: 0.2,
        }
    }
}

impl Cfg {
    /// Load config from the store. If no `config:*` keys exist, seed defaults.
    pub async fn load(store: &dyn Store) -> Result<Self, PipelineError> {
        let config_keys = store.scan_prefix(keys::CONFIG_PREFIX).await?;
        if config_keys.is_empty() {
            let cfg = Self::default();
            cfg.seed(store).await?;
            return Ok(cfg);
        }

        let mut map = HashMap::new();
        for key in config_keys {
            if let Some(serde_json::Value::String(v)) = store.get(&key).await? {
                map.insert(key[keys::CONFIG_PREFIX.len()..].to_owned(), v);
            }
        }
        Ok(Self::from_map(&map))
    }

    /// Write all default values under `config:*`.
    async fn seed(&self, store: &dyn Store) -> Result<(), PipelineError> {
        for (key, value) in self.to_entries() {
            store
                .set(&format!("{}{key}", keys::CONFIG_PREFIX), serde_json::Value::String(value))
                .await?;
        }
        Ok(())
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            planner_timeout_secs: get_or(m, "planner_timeout_secs", d.planner_timeout_secs),
            runner_timeout_secs: get_or(m, "runner_timeout_secs", d.runner_timeout_secs),
            retry_max_attempts: get_or(m, "retry_max_attempts", d.retry_max_attempts),
            retry_backoff_min_secs: get_or(m, "retry_backoff_min_secs", d.retry_backoff_min_secs),
            retry_backoff_max_secs: get_or(m, "retry_backoff_max_secs", d.retry_backoff_max_secs),
            error_preview_max_len: get_or(m, "error_preview_max_len", d.error_preview_max_len),
            result_log_max_len: get_or(m, "result_log_max_len", d.result_log_max_len),
            cron_check_interval_secs: get_or(m, "cron_check_interval_secs", d.cron_check_interval_secs),
            speedrun_interval_secs: get_or(m, "speedrun_interval_secs", d.speedrun_interval_secs),
            speedrun_max_per_cycle: get_or(m, "speedrun_max_per_cycle", d.speedrun_max_per_cycle),
            feedback_drain_cap: get_or(m, "feedback_drain_cap", d.feedback_drain_cap),
            idle_poll_interval_ms: get_or(m, "idle_poll_interval_ms", d.idle_poll_interval_ms),
            reclaim_after_secs: get_or(m, "reclaim_after_secs", d.reclaim_after_secs),
            llm_max_tokens: get_or(m, "llm_max_tokens", d.llm_max_tokens),
            llm_temperature: get_or(m, "llm_temperature", d.llm_temperature),
        }
    }

    fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("planner_timeout_secs", self.planner_timeout_secs.to_string()),
            ("runner_timeout_secs", self.runner_timeout_secs.to_string()),
            ("retry_max_attempts", self.retry_max_attempts.to_string()),
            ("retry_backoff_min_secs", self.retry_backoff_min_secs.to_string()),
            ("retry_backoff_max_secs", self.retry_backoff_max_secs.to_string()),
            ("error_preview_max_len", self.error_preview_max_len.to_string()),
            ("result_log_max_len", self.result_log_max_len.to_string()),
            ("cron_check_interval_secs", self.cron_check_interval_secs.to_string()),
            ("speedrun_interval_secs", self.speedrun_interval_secs.to_string()),
            ("speedrun_max_per_cycle", self.speedrun_max_per_cycle.to_string()),
            ("feedback_drain_cap", self.feedback_drain_cap.to_string()),
            ("idle_poll_interval_ms", self.idle_poll_interval_ms.to_string()),
            ("reclaim_after_secs", self.reclaim_after_secs.to_string()),
            ("llm_max_tokens", self.llm_max_tokens.to_string()),
            ("llm_temperature", self.llm_temperature.to_string()),
        ]
    }

    /// Retry policy for scheduler-driven execution.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.runner_timeout_secs),
            max_attempts: self.retry_max_attempts,
            backoff_min: Duration::from_secs_f64(self.retry_backoff_min_secs),
            backoff_max: Duration::from_secs_f64(self.retry_backoff_max_secs),
        }
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_secs(self.runner_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn load_seeds_defaults_on_empty_store() {
        let store = MemoryStore::new();
        let cfg = Cfg::load(&store).await.unwrap();
        assert_eq!(cfg.retry_max_attempts, 3);

        // Seeded values are readable on the next load.
        let keys = store.scan_prefix(keys::CONFIG_PREFIX).await.unwrap();
        assert!(!keys.is_empty());
    }

    #[tokio::test]
    async fn load_prefers_stored_values() {
        let store = MemoryStore::new();
        Cfg::load(&store).await.unwrap();
        store
            .set("config:retry_max_attempts", serde_json::Value::String("5".into()))
            .await
            .unwrap();

        let cfg = Cfg::load(&store).await.unwrap();
        assert_eq!(cfg.retry_max_attempts, 5);
    }

    #[tokio::test]
    async fn unparseable_values_fall_back_to_default() {
        let store = MemoryStore::new();
        Cfg::load(&store).await.unwrap();
        store
            .set("config:retry_max_attempts", serde_json::Value::String("lots".into()))
            .await
            .unwrap();

        let cfg = Cfg::load(&store).await.unwrap();
        assert_eq!(cfg.retry_max_attempts, 3);
    }
}
