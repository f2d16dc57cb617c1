/// Core error taxonomy
///
/// Every fallible operation the core surfaces is one of these variants.
/// `error_type()` returns the tag persisted in a task's `error_info.error_type`
/// field so the error hierarchy and the durable record never drift apart.
use thiserror::Error;

/// Error taxonomy for the task orchestration core.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Base-field or payload schema violation before acceptance. The task is
    /// never persisted.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Accepted but could not be processed (DB insert failure, runner
    /// submission failure). Persisted as FAILED with `error_info`.
    #[error("unprocessable task: {0}")]
    UnprocessableTask(String),

    /// `get`/`cancel`/`delete` referenced an unknown task id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// `cancel` on an already-terminal task, or `permanently_delete` on a
    /// non-terminal, non-expired one.
    #[error("task conflict: {0}")]
    TaskConflict(String),

    /// Raised by a runner to signal submission/cancel/status-fetch failure.
    #[error("task execution error: {0}")]
    TaskExecution(String),

    /// The task's `task_type` has no registered runner.
    #[error("no runner registered for task type: {0}")]
    UnknownRunner(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    /// The tag stored in `error_info.error_type` for a failure of this kind.
    pub fn error_type(&self) -> &'static str {
        match self {
            TaskError::InvalidTask(_) => "InvalidTaskError",
            TaskError::UnprocessableTask(_) => "UnprocessableTaskError",
            TaskError::TaskNotFound(_) => "TaskNotFoundError",
            TaskError::TaskConflict(_) => "TaskConflictError",
            TaskError::TaskExecution(_) => "TaskExecutionError",
            TaskError::UnknownRunner(_) => "UnknownRunnerError",
            TaskError::Database(_) => "DatabaseError",
            TaskError::Serialization(_) => "SerializationError",
        }
    }

    /// Builds the `error_info` document the persistence layer expects:
    /// `{error, error_type, timestamp}`.
    pub fn to_error_info(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "error_type": self.error_type(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_matches_variant() {
        assert_eq!(
            TaskError::TaskConflict("x".into()).error_type(),
            "TaskConflictError"
        );
        assert_eq!(
            TaskError::UnknownRunner("no_such_runner".into()).error_type(),
            "UnknownRunnerError"
        );
    }

    #[test]
    fn error_info_has_required_fields() {
        let info = TaskError::TaskExecution("boom".into()).to_error_info();
        assert_eq!(info["error"], "task execution error: boom");
        assert_eq!(info["error_type"], "TaskExecutionError");
        assert!(info["timestamp"].is_string());
    }
}
