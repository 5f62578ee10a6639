//! Runner collaborator boundary.
//!
//! A runner takes a step description plus context and returns free text.
//! Soft failures (the backend ran but the step did not succeed) come back as
//! `Ok` text and are caught by the worked/failed classifier; `Err` is reserved
//! for infrastructure faults where redelivery makes sense.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;

use convoy_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::classify::RUNNER_ERROR_PREFIX;
use crate::error::PipelineError;

#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, step: &str, context: &str) -> Result<String, PipelineError>;
}

/// Compose the prompt handed to a runner backend.
fn build_prompt(step: &str, context: &str) -> String {
    if context.is_empty() {
        step.trim().to_owned()
    } else {
        format!("Context:\n{}\n\n{}", context.trim(), step.trim())
    }
}

/// Spawns an external agent CLI per step, prompt on stdin, result on stdout.
///
/// A non-zero exit is a soft failure: the error text is returned with the
/// runner error prefix so the classifier routes it to the failed channel.
/// Spawn failures are transient (the backend binary or host is unhealthy).
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Parse a command line like `"agent --headless"` into program + args.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self { program, args: parts.collect() })
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, step: &str, context: &str) -> Result<String, PipelineError> {
        let prompt = build_prompt(step, context);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Transient(format!("failed to spawn {}: {e}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| PipelineError::Transient(format!("runner stdin write: {e}")))?;
            // Dropping stdin closes it so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::Transient(format!("runner wait: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Ok(format!(
                "{RUNNER_ERROR_PREFIX} {} exited with {}: {detail}",
                self.program, output.status
            ));
        }
        Ok(stdout)
    }
}

/// Runs steps directly against the LLM provider. The fallback backend when no
/// external agent command is configured — useful for demos and dry runs.
pub struct LlmRunner {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl LlmRunner {
    pub fn new(llm: Arc<dyn LlmProvider>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

#[async_trait]
impl Runner for LlmRunner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn run(&self, step: &str, context: &str) -> Result<String, PipelineError> {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(
                    "You are a step executor. Carry out the given step and report concretely what you did and what the result was. If you cannot carry it out, start your reply with 'failed:' and say why.",
                ),
                ChatMessage::user(build_prompt(step, context)),
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };
        let response = self.llm.complete(request).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_llm::provider::MockProvider;

    #[test]
    fn prompt_without_context_is_bare_step() {
        assert_eq!(build_prompt("do A", ""), "do A");
    }

    #[test]
    fn prompt_with_context_prefixes_it() {
        let p = build_prompt("do A", "Task: Build X");
        assert!(p.starts_with("Context:\nTask: Build X"));
        assert!(p.ends_with("do A"));
    }

    #[test]
    fn from_command_line_splits_program_and_args() {
        let r = ProcessRunner::from_command_line("agent --headless -v").unwrap();
        assert_eq!(r.program, "agent");
        assert_eq!(r.args, vec!["--headless".to_string(), "-v".to_string()]);
        assert!(ProcessRunner::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn llm_runner_returns_provider_text() {
        let runner = LlmRunner::new(Arc::new(MockProvider::new("did the thing")), 512);
        let out = runner.run("do A", "").await.unwrap();
        assert_eq!(out, "did the thing");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_stdout() {
        let runner = ProcessRunner::new("cat", vec![]);
        let out = runner.run("echo back this step", "").await.unwrap();
        assert_eq!(out, "echo back this step");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_nonzero_exit_is_soft_failure() {
        let runner = ProcessRunner::new("false", vec![]);
        let out = runner.run("do A", "").await.unwrap();
        assert!(out.starts_with(RUNNER_ERROR_PREFIX));
    }

    #[tokio::test]
    async fn process_runner_missing_binary_is_transient() {
        let runner = ProcessRunner::new("definitely-not-a-real-binary-xyz", vec![]);
        let err = runner.run("do A", "").await.unwrap_err();
        assert!(err.is_transient());
    }
}
