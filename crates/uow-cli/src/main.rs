use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

use uow_core::{
    Handler, QueueBuilder, QueueConfig, Schedule, Task, TaskId, TaskPayload, TaskStatus,
    WorkerContext,
};

#[derive(Parser)]
#[command(name = "uow", version, about = "Unit-of-work task queue")]
struct Cli {
    /// TOML config file (missing keys use defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the email flow end to end against an in-memory store
    Demo {
        /// Number of competing email workers
        #[arg(long, default_value_t = 2)]
        workers: usize,

        /// Recipient address put in the task data
        #[arg(long, default_value = "someone@example.com")]
        to: String,
    },

    /// Print the next occurrences of a recurrence expression
    Schedule {
        expression: String,

        #[arg(long, default_value_t = 5)]
        count: usize,

        /// Reference time (RFC 3339), defaults to now
        #[arg(long)]
        from: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct SendEmail {
    to: String,
}

impl TaskPayload for SendEmail {
    const TYPE: &'static str = "email";
}

/// メール送信のふりをする handler
struct SendEmailHandler;

#[async_trait]
impl Handler<SendEmail> for SendEmailHandler {
    async fn handle(&self, ctx: WorkerContext, task: Task, email: SendEmail) -> uow_core::Result<()> {
        let task_id = task.require_id()?;
        tracing::info!(worker_id = %ctx.worker_id(), task_id = %task_id, to = %email.to, "sending email");

        ctx.progress(task_id, json!({ "stage": "connecting" })).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.complete(task_id, json!({ "sent": true, "to": email.to }))
            .await?;
        Ok(())
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<QueueConfig> {
    match path {
        Some(path) => QueueConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(QueueConfig::default()),
    }
}

fn init_tracing(config: &QueueConfig) {
    // UOW_LOG が設定されていればそちらを優先
    let filter = EnvFilter::try_from_env("UOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let _ = fmt().with_env_filter(filter).try_init();
}

async fn run_demo(config: QueueConfig, workers: usize, to: String) -> anyhow::Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }

    let mut queue = QueueBuilder::new().config(config).build()?;
    for _ in 0..workers {
        queue.register_typed::<SendEmail, _>(SendEmailHandler)?;
    }
    queue.start();

    let task = queue
        .request_task(SendEmail::TYPE)
        .data(serde_json::to_value(SendEmail { to })?)
        .priority("high")
        .send()
        .await?;
    let task_id = task.require_id()?;
    println!("submitted {task_id}");

    let outcome = tokio::select! {
        finished = wait_until_terminal(&queue, task_id) => Some(finished),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(finished) = outcome else {
        queue.shutdown_and_join().await;
        bail!("interrupted");
    };
    let finished = finished?;

    println!("{}", serde_json::to_string_pretty(&finished)?);
    println!("counts: {:?}", queue.counts().await?);
    queue.shutdown_and_join().await;

    if finished.status() != TaskStatus::Success {
        bail!("task ended as {}", finished.status());
    }
    Ok(())
}

async fn wait_until_terminal(queue: &uow_core::Queue, task_id: TaskId) -> anyhow::Result<Task> {
    loop {
        let task = queue.get_task(task_id).await?;
        if task.status().is_terminal() {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn print_schedule(expression: &str, count: usize, from: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let schedule = Schedule::parse(expression)?;
    let reference = from.unwrap_or_else(Utc::now);

    for at in schedule.upcoming(reference.timestamp_millis(), count) {
        let at = DateTime::from_timestamp_millis(at).context("occurrence out of range")?;
        println!("{}", at.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Demo { workers, to } => run_demo(config, workers, to).await,
        Commands::Schedule {
            expression,
            count,
            from,
        } => print_schedule(&expression, count, from),
    }
}
