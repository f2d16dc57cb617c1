/// Runner contract (§4.2)
///
/// Every concrete runner (CDC pipeline, SQL gateway, and the in-process mock
/// used by tests) implements this trait. Expressed as an object-safe
/// `async_trait`, the same shape as the teacher's `Adapter` trait, so the
/// registry can hold `Arc<dyn Runner>` — but with submit/poll/cancel
/// semantics instead of a single run-to-completion `execute`, since a runner
/// here supervises a long-lived external process or remote session rather
/// than running inline.
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use resinkit_core::logfile::LogLevel;
use resinkit_core::models::task::Task;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid runner config: {0}")]
    InvalidConfig(String),

    #[error("runner execution error: {0}")]
    Execution(String),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// A single captured log line, as returned by `get_log_summary`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

/// Everything a runner needs to submit, poll, or cancel one task.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner name, used for registry lookup and logging.
    fn name(&self) -> &str;

    /// Validates a task's `submitted_configs` document before acceptance.
    fn validate_config(&self, config: &JsonValue) -> RunnerResult<()>;

    /// Builds the runner's typed representation of a task row, substituting
    /// `variables` into every string leaf of the submitted config.
    fn from_dao(&self, row: &Task, variables: &std::collections::HashMap<String, String>) -> RunnerResult<JsonValue>;

    /// Submits the task for execution. May return an already-terminal
    /// status if submission fails fast; otherwise the task is RUNNING.
    async fn submit_task(&self, task: &Task, rendered: &JsonValue) -> RunnerResult<Task>;

    /// Idempotent status poll; may advance the task's status toward terminal.
    async fn fetch_task_status(&self, task: &Task) -> RunnerResult<Task>;

    /// The most recent (at most 100) log entries matching `level`.
    async fn get_log_summary(&self, task: &Task, level: Option<LogLevel>) -> RunnerResult<Vec<LogEntry>>;

    /// The task's result document, once COMPLETED.
    async fn get_result(&self, task: &Task) -> RunnerResult<Option<JsonValue>>;

    /// Cancels the task, gracefully or forcefully (§5).
    async fn cancel(&self, task: &Task, force: bool) -> RunnerResult<Task>;

    /// Cancels all in-flight work and frees external resources. Called once
    /// at process shutdown.
    async fn shutdown(&self);
}
