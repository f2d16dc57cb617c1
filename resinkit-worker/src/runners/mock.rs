/// In-process mock runner for tests
///
/// Grounded on the teacher's `MockAdapter`: deterministic, no external
/// dependencies, configurable duration and failure injection — but
/// reworked for submit/poll/cancel semantics instead of run-to-completion.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use resinkit_core::logfile::LogLevel;
use resinkit_core::models::task::{Task, TaskStatus};

use crate::runner::{LogEntry, Runner, RunnerError, RunnerResult};

#[derive(Debug, Clone, Deserialize)]
struct MockConfig {
    #[serde(default = "default_duration_ms")]
    duration_ms: u64,
    #[serde(default)]
    should_fail: bool,
}

fn default_duration_ms() -> u64 {
    0
}

struct MockState {
    started_at: Instant,
    duration_ms: u64,
    should_fail: bool,
    cancelled: bool,
}

#[derive(Default)]
pub struct MockRunner {
    state: Mutex<HashMap<String, MockState>>,
}

#[async_trait]
impl Runner for MockRunner {
    fn name(&self) -> &str {
        "mock_task"
    }

    fn validate_config(&self, config: &JsonValue) -> RunnerResult<()> {
        if config.get("task_type").and_then(JsonValue::as_str).is_none() {
            return Err(RunnerError::InvalidConfig("missing 'task_type'".to_string()));
        }
        Ok(())
    }

    fn from_dao(&self, row: &Task, variables: &HashMap<String, String>) -> RunnerResult<JsonValue> {
        Ok(resinkit_core::variables::render_with_variables(&row.submitted_configs, variables))
    }

    async fn submit_task(&self, task: &Task, rendered: &JsonValue) -> RunnerResult<Task> {
        let config: MockConfig = serde_json::from_value(rendered.clone()).unwrap_or(MockConfig {
            duration_ms: default_duration_ms(),
            should_fail: false,
        });

        self.state.lock().unwrap().insert(
            task.task_id.clone(),
            MockState {
                started_at: Instant::now(),
                duration_ms: config.duration_ms,
                should_fail: config.should_fail,
                cancelled: false,
            },
        );

        let mut next = task.with_status(TaskStatus::Running);
        next.execution_details = Some(serde_json::json!({ "runner": "mock" }));
        Ok(next)
    }

    async fn fetch_task_status(&self, task: &Task) -> RunnerResult<Task> {
        let states = self.state.lock().unwrap();
        let Some(state) = states.get(&task.task_id) else {
            return Ok(task.clone());
        };

        if state.cancelled {
            return Ok(task.with_status(TaskStatus::Cancelled));
        }

        if state.started_at.elapsed().as_millis() as u64 >= state.duration_ms {
            let mut next = task.with_status(if state.should_fail {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            });
            if state.should_fail {
                next.error_info = Some(serde_json::json!({
                    "error": "mock task configured to fail",
                    "error_type": "TaskExecutionError",
                }));
            } else {
                next.result_summary = Some(serde_json::json!({ "mock": true }));
            }
            return Ok(next);
        }

        Ok(task.with_status(TaskStatus::Running))
    }

    async fn get_log_summary(&self, _task: &Task, _level: Option<LogLevel>) -> RunnerResult<Vec<LogEntry>> {
        Ok(vec![])
    }

    async fn get_result(&self, task: &Task) -> RunnerResult<Option<JsonValue>> {
        Ok(task.result_summary.clone())
    }

    async fn cancel(&self, task: &Task, _force: bool) -> RunnerResult<Task> {
        if let Some(state) = self.state.lock().unwrap().get_mut(&task.task_id) {
            state.cancelled = true;
        }
        Ok(task.with_status(TaskStatus::Cancelled))
    }

    async fn shutdown(&self) {
        self.state.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_task() -> Task {
        Task {
            task_id: "mock_task_testtest1".to_string(),
            task_type: "mock_task".to_string(),
            task_name: "test".to_string(),
            description: None,
            status: resinkit_core::models::task::TaskStatusColumn(TaskStatus::Pending),
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            finished_at: None,
            expires_at: None,
            submitted_configs: serde_json::json!({ "duration_ms": 0 }),
            error_info: None,
            result_summary: None,
            execution_details: None,
            progress_details: None,
            notification_config: None,
            tags: serde_json::json!([]),
            created_by: "tester".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn submit_then_poll_completes_immediately_with_zero_duration() {
        let runner = MockRunner::default();
        let task = sample_task();

        let rendered = serde_json::json!({ "duration_ms": 0, "should_fail": false });
        let running = runner.submit_task(&task, &rendered).await.unwrap();
        assert_eq!(running.status(), TaskStatus::Running);

        let polled = runner.fetch_task_status(&running).await.unwrap();
        assert_eq!(polled.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn should_fail_config_reports_failed() {
        let runner = MockRunner::default();
        let task = sample_task();

        let rendered = serde_json::json!({ "duration_ms": 0, "should_fail": true });
        let running = runner.submit_task(&task, &rendered).await.unwrap();
        let polled = runner.fetch_task_status(&running).await.unwrap();

        assert_eq!(polled.status(), TaskStatus::Failed);
        assert!(polled.error_info.is_some());
    }

    #[tokio::test]
    async fn cancel_marks_task_cancelled() {
        let runner = MockRunner::default();
        let task = sample_task();

        let rendered = serde_json::json!({ "duration_ms": 60_000 });
        let running = runner.submit_task(&task, &rendered).await.unwrap();
        let cancelled = runner.cancel(&running, true).await.unwrap();
        assert_eq!(cancelled.status(), TaskStatus::Cancelled);

        let polled = runner.fetch_task_status(&running).await.unwrap();
        assert_eq!(polled.status(), TaskStatus::Cancelled);
    }
}
