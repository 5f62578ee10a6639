//! `convoy` — stage daemon launcher.
//!
//! Each subcommand runs one pipeline stage as an independent process; scale a
//! stage by running more processes (or `executor --workers N` for an in-process
//! pool). With `DATABASE_URL` set, state and queues live in Postgres; without
//! it the process falls back to ephemeral in-memory state, which is only
//! useful for single-process experiments.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use convoy_core::config::Cfg;
use convoy_core::executor::{ExecutionStage, LlmRunner, ProcessRunner, Runner};
use convoy_core::feedback::{FeedbackStage, StubBuilder};
use convoy_core::planner::PlannerStage;
use convoy_core::queue::{MemoryQueue, PgQueue, Queue, names, publish_typed};
use convoy_core::requeue::requeue_blocked;
use convoy_core::scheduler::{run_cron, run_speedrun, run_trigger};
use convoy_core::shutdown::ShutdownGuard;
use convoy_core::store::{MemoryStore, PgStore, Store, registry};
use convoy_core::types::{IntakeMessage, Tool};
use convoy_llm::provider::LlmProvider;

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;

#[derive(Parser)]
#[command(name = "convoy", about = "Self-expanding task pipeline daemons")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume intake requests, plan steps, publish them for execution.
    Planner,
    /// Consume steps and run them against the configured runner backend.
    Executor {
        /// Number of in-process workers (each holds one step in flight).
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Run one feedback cycle: propose capabilities, classify failures.
    Feedback {
        /// Repeat the cycle every N seconds instead of exiting.
        #[arg(long)]
        watch_secs: Option<u64>,
    },
    /// Republish blocked tasks to intake and delete their stale records.
    Requeue,
    /// Run a scheduler variant over standalone work items.
    Scheduler {
        #[arg(long, value_enum, default_value = "trigger")]
        mode: SchedulerMode,
    },
    /// Seed the capability registry's tool list from a JSON file.
    SeedTools {
        #[arg(long)]
        file: PathBuf,
    },
    /// Publish a task request to the intake queue.
    Publish {
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long)]
        order: Option<i64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchedulerMode {
    Trigger,
    Cron,
    Speedrun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (store, queue) = connect_backend().await;
    let cfg = Cfg::load(store.as_ref()).await?;

    let shutdown = ShutdownGuard::new();
    shutdown.spawn_signal_listener();
    let token = shutdown.token();

    match cli.command {
        Command::Planner => {
            let stage = PlannerStage::new(store, queue, require_llm()?, cfg);
            stage.run(token).await;
        }
        Command::Executor { workers } => {
            let runner = build_runner(&cfg)?;
            let mut handles = Vec::new();
            for worker in 0..workers.max(1) {
                let stage = ExecutionStage::new(
                    Arc::clone(&store),
                    Arc::clone(&queue),
                    Arc::clone(&runner),
                    cfg.clone(),
                );
                let token = token.clone();
                handles.push(tokio::spawn(async move {
                    tracing::info!(worker, "executor worker starting");
                    stage.run(token).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        Command::Feedback { watch_secs } => {
            let stage =
                FeedbackStage::new(store, queue, require_llm()?, Arc::new(StubBuilder), cfg);
            loop {
                match stage.run_cycle().await {
                    Ok(report) => println!(
                        "feedback cycle: {} proposals, {} built {:?}, {} human todos",
                        report.proposals_published,
                        report.built_count,
                        report.built_capability_ids,
                        report.human_todo_count,
                    ),
                    Err(e) => tracing::error!(error = %e, "feedback cycle failed"),
                }
                let Some(secs) = watch_secs else { break };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                }
            }
        }
        Command::Requeue => {
            // Driver failures leave the store untouched and report zero.
            let count = match requeue_blocked(store.as_ref(), queue.as_ref()).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "requeue failed");
                    0
                }
            };
            println!("requeued {count} blocked task(s)");
        }
        Command::Scheduler { mode } => {
            let runner = build_runner(&cfg)?;
            match mode {
                SchedulerMode::Trigger => run_trigger(store, queue, runner, cfg, token).await,
                SchedulerMode::Cron => run_cron(store, runner, cfg, token).await,
                SchedulerMode::Speedrun => run_speedrun(store, runner, cfg, token).await,
            }
        }
        Command::SeedTools { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let tools: Vec<Tool> =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
            registry::set_tools(store.as_ref(), &tools).await?;
            println!("seeded {} tool(s)", tools.len());
        }
        Command::Publish { task, topic, order } => {
            let msg = IntakeMessage { task, topic, order, source: "cli".into() };
            publish_typed(queue.as_ref(), names::INTAKE, &msg).await?;
            println!("published intake request");
        }
    }

    Ok(())
}

/// Connect to Postgres when configured, falling back to ephemeral in-memory
/// state (with a warning) when the database is absent or unreachable.
async fn connect_backend() -> (Arc<dyn Store>, Arc<dyn Queue>) {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let connect = sqlx::postgres::PgPoolOptions::new().max_connections(8).connect(&url);
        match tokio::time::timeout(Duration::from_secs(DB_CONNECT_TIMEOUT_SECS), connect).await {
            Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                Ok(()) => {
                    tracing::info!("connected to Postgres");
                    return (Arc::new(PgStore::new(pool.clone())), Arc::new(PgQueue::new(pool)));
                }
                Err(e) => tracing::warn!(error = %e, "migrations failed, using ephemeral state"),
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "DATABASE_URL unreachable, using ephemeral state");
            }
            Err(_) => tracing::warn!(
                timeout_secs = DB_CONNECT_TIMEOUT_SECS,
                "database connect timed out, using ephemeral state"
            ),
        }
    } else {
        tracing::warn!("DATABASE_URL not set, using ephemeral in-memory state");
    }
    (Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()))
}

fn require_llm() -> anyhow::Result<Arc<dyn LlmProvider>> {
    match convoy_llm::http::from_env() {
        Some(provider) => Ok(Arc::new(provider)),
        None => bail!("CONVOY_LLM_MODEL and CONVOY_LLM_API_KEY must be set for this stage"),
    }
}

/// Runner backend: an external agent command when configured, otherwise the
/// LLM provider directly.
fn build_runner(cfg: &Cfg) -> anyhow::Result<Arc<dyn Runner>> {
    if let Ok(cmd) = std::env::var("CONVOY_RUNNER_CMD") {
        match ProcessRunner::from_command_line(&cmd) {
            Some(runner) => {
                tracing::info!(command = %cmd, "using process runner");
                return Ok(Arc::new(runner));
            }
            None => bail!("CONVOY_RUNNER_CMD is set but empty"),
        }
    }
    let llm = require_llm()
        .context("set CONVOY_RUNNER_CMD or configure an LLM provider for the runner")?;
    tracing::info!("using LLM runner");
    Ok(Arc::new(LlmRunner::new(llm, cfg.llm_max_tokens)))
}
