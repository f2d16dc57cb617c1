/// Task manager (C10, §4.9)
///
/// Owns the full task lifecycle: acceptance, the validate/prepare/submit
/// state machine, background status and timeout monitoring, cancellation,
/// and deletion. Grounded on the original service's `TaskManager` in
/// `tasks.py`, re-expressed with `tokio::spawn` in place of asyncio tasks and
/// the teacher's `TimeoutEnforcer` spawn-sleep-act idiom for the timeout
/// monitor.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use resinkit_core::config::Settings;
use resinkit_core::error::{TaskError, TaskResult};
use resinkit_core::logfile::LogLevel;
use resinkit_core::models::task::{
    self, CreateTask, Page, SortSpec, StatusUpdate, Task as TaskRow, TaskFilters, TaskStatus,
};
use resinkit_core::models::variable::get_all_variables_decrypted;

use crate::registry::RunnerRegistry;
use crate::runner::LogEntry;
use crate::task_types::{generate_task_id, validate_base};

/// Input to [`TaskManager::submit_task`]. `submitted_configs` carries the
/// runner-specific document (`job`, `runtime`, `resources`, ...); `task_type`
/// must appear both here and inside it, mirroring the original payload shape.
pub struct SubmitTaskPayload {
    pub task_type: String,
    pub task_name: String,
    pub description: Option<String>,
    pub priority: i32,
    pub created_by: String,
    pub notification_config: Option<Json>,
    pub tags: Vec<String>,
    pub submitted_configs: Json,
    pub task_timeout_seconds: Option<i64>,
}

pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub self_link: String,
}

pub struct TaskManager {
    pool: PgPool,
    registry: Arc<RunnerRegistry>,
    settings: Arc<Settings>,
    monitors: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new(pool: PgPool, registry: Arc<RunnerRegistry>, settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(TaskManager {
            pool,
            registry,
            settings,
            monitors: Mutex::new(HashMap::new()),
        })
    }

    /// 1. Validate base fields. 2. Generate `task_id`, persist as PENDING
    /// (journals a CREATE event). 3. Schedule `execute_task` detached.
    /// 4. Return a summary with `_links.self`.
    pub async fn submit_task(self: &Arc<Self>, payload: SubmitTaskPayload) -> TaskResult<TaskSummary> {
        validate_base(&payload.submitted_configs).map_err(|e| TaskError::InvalidTask(e.to_string()))?;

        let task_id = generate_task_id(&payload.task_type);
        let created = task::create_task(
            &self.pool,
            CreateTask {
                task_id: task_id.clone(),
                task_type: payload.task_type,
                task_name: payload.task_name,
                description: payload.description,
                priority: payload.priority,
                submitted_configs: payload.submitted_configs,
                notification_config: payload.notification_config,
                tags: payload.tags,
                created_by: payload.created_by,
                task_timeout_seconds: payload.task_timeout_seconds,
            },
        )
        .await?;

        let manager = Arc::clone(self);
        let timeout_secs = payload.task_timeout_seconds.unwrap_or(0);
        let spawned_id = task_id.clone();
        tokio::spawn(async move {
            manager.execute_task(&spawned_id, timeout_secs).await;
        });

        Ok(TaskSummary {
            self_link: format!("/tasks/{}", created.task_id),
            task_id: created.task_id,
            status: created.status(),
        })
    }

    /// VALIDATING -> PREPARING -> RUNNING (or straight to a terminal status
    /// if the runner fails fast). Any failure along the way persists FAILED
    /// with `error_info` and returns without starting monitoring.
    async fn execute_task(self: &Arc<Self>, task_id: &str, task_timeout_seconds: i64) {
        if let Err(err) = self.try_execute_task(task_id, task_timeout_seconds).await {
            let _ = task::update_task_status(
                &self.pool,
                task_id,
                TaskStatus::Failed,
                "system",
                StatusUpdate {
                    error_info: Some(err.to_error_info()),
                    ..Default::default()
                },
            )
            .await;
        }
    }

    async fn try_execute_task(self: &Arc<Self>, task_id: &str, task_timeout_seconds: i64) -> TaskResult<()> {
        let task = task::update_task_status(&self.pool, task_id, TaskStatus::Validating, "system", StatusUpdate::default()).await?;

        let runner = self
            .registry
            .get(&task.task_type)
            .map_err(|e| TaskError::UnknownRunner(e.to_string()))?;

        runner
            .validate_config(&task.submitted_configs)
            .map_err(|e| TaskError::InvalidTask(e.to_string()))?;

        let task = task::update_task_status(&self.pool, task_id, TaskStatus::Preparing, "system", StatusUpdate::default()).await?;

        let variables = get_all_variables_decrypted(&self.pool, &self.settings.variable_encryption_key).await?;
        let rendered = runner
            .from_dao(&task, &variables)
            .map_err(|e| TaskError::UnprocessableTask(e.to_string()))?;

        let submitted = runner
            .submit_task(&task, &rendered)
            .await
            .map_err(|e| TaskError::TaskExecution(e.to_string()))?;

        if submitted.status().is_terminal() {
            task::update_task_status(
                &self.pool,
                task_id,
                submitted.status(),
                "system",
                StatusUpdate {
                    error_info: submitted.error_info,
                    result_summary: submitted.result_summary,
                    execution_details: submitted.execution_details,
                    progress_details: submitted.progress_details,
                },
            )
            .await?;
            return Ok(());
        }

        task::update_task_status(
            &self.pool,
            task_id,
            TaskStatus::Running,
            "system",
            StatusUpdate {
                execution_details: submitted.execution_details.clone(),
                ..Default::default()
            },
        )
        .await?;

        self.start_task_monitoring(task_id, submitted, task_timeout_seconds).await;
        Ok(())
    }

    /// Spawns the status monitor, and (if `task_timeout_seconds > 0`) the
    /// timeout monitor, tracking both join handles so `shutdown` can abort
    /// them cleanly. Each monitor clears its own map entry on completion
    /// (mirrors the original's `add_done_callback` pop).
    async fn start_task_monitoring(self: &Arc<Self>, task_id: &str, task: TaskRow, task_timeout_seconds: i64) {
        let manager = Arc::clone(self);
        let monitor_id = task_id.to_string();
        let task_type = task.task_type.clone();
        let handle_id = monitor_id.clone();
        let handle = tokio::spawn(async move {
            manager.monitor_task(handle_id, task_type).await;
        });
        self.monitors.lock().await.insert(monitor_id, handle);

        if task_timeout_seconds > 0 {
            let manager = Arc::clone(self);
            let timeout_id = format!("{}_timeout", task_id);
            let handle_id = timeout_id.clone();
            let handle = tokio::spawn(async move {
                manager.task_timeout_monitor(handle_id, task, task_timeout_seconds).await;
            });
            self.monitors.lock().await.insert(timeout_id, handle);
        }
    }

    /// Polls `runner.fetch_task_status` with exponential backoff (floor,
    /// doubling, capped — §5) until the status changes or becomes terminal.
    /// Reloads the persisted row every iteration so a terminal status written
    /// by another path (e.g. `cancel_task`) while this loop sleeps is
    /// observed instead of being overridden by a stale in-memory status.
    async fn monitor_task(&self, task_id: String, task_type: String) {
        let floor = Duration::from_millis(self.settings.poll_interval_floor_ms);
        let cap = Duration::from_secs(self.settings.poll_interval_cap_secs);
        let mut interval = floor;

        let Ok(runner) = self.registry.get(&task_type) else {
            self.monitors.lock().await.remove(&task_id);
            return;
        };

        loop {
            let current = match task::get_task(&self.pool, &task_id).await {
                Ok(t) => t,
                Err(_) => break,
            };
            if current.status().is_terminal() {
                break;
            }

            match runner.fetch_task_status(&current).await {
                Err(err) => {
                    let _ = task::update_task_status(
                        &self.pool,
                        &task_id,
                        TaskStatus::Failed,
                        "system",
                        StatusUpdate {
                            error_info: Some(serde_json::json!({
                                "error": format!("Monitoring error: {err}"),
                                "error_type": "TaskExecutionError",
                                "timestamp": chrono::Utc::now().to_rfc3339(),
                            })),
                            ..Default::default()
                        },
                    )
                    .await;
                    break;
                }
                Ok(updated) => {
                    if updated.status() != current.status() {
                        let log_summary = runner.get_log_summary(&updated, None).await.unwrap_or_default();
                        let progress_details = Some(serde_json::json!({ "log_summary": log_summary }));

                        let persisted = task::update_task_status(
                            &self.pool,
                            &task_id,
                            updated.status(),
                            "system",
                            StatusUpdate {
                                error_info: updated.error_info.clone(),
                                result_summary: updated.result_summary.clone(),
                                execution_details: updated.execution_details.clone(),
                                progress_details,
                            },
                        )
                        .await;

                        if updated.status().is_terminal() || persisted.is_err() {
                            break;
                        }
                    }
                }
            }

            tokio::time::sleep(interval).await;
            interval = std::cmp::min(interval * 2, cap);
        }

        self.monitors.lock().await.remove(&task_id);
    }

    /// Sleeps `timeout_seconds`, then re-confirms the task is still
    /// non-terminal (both the persisted row and a fresh runner query) before
    /// forcing it to FAILED and force-cancelling.
    async fn task_timeout_monitor(&self, handle_id: String, task: TaskRow, timeout_seconds: i64) {
        if timeout_seconds <= 0 {
            self.monitors.lock().await.remove(&handle_id);
            return;
        }
        tokio::time::sleep(Duration::from_secs(timeout_seconds as u64)).await;

        let Ok(current) = task::get_task(&self.pool, &task.task_id).await else {
            self.monitors.lock().await.remove(&handle_id);
            return;
        };
        if current.has_ended() {
            self.monitors.lock().await.remove(&handle_id);
            return;
        }

        let Ok(runner) = self.registry.get(&task.task_type) else {
            self.monitors.lock().await.remove(&handle_id);
            return;
        };

        let still_running = match runner.fetch_task_status(&current).await {
            Ok(updated) => !updated.status().is_terminal(),
            Err(_) => true,
        };
        if !still_running {
            self.monitors.lock().await.remove(&handle_id);
            return;
        }

        let _ = task::update_task_status(
            &self.pool,
            &task.task_id,
            TaskStatus::Failed,
            "system",
            StatusUpdate {
                error_info: Some(serde_json::json!({
                    "error": format!("Task timed out after {timeout_seconds} seconds"),
                    "error_type": "TaskTimeoutError",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
                ..Default::default()
            },
        )
        .await;

        let _ = runner.cancel(&current, true).await;
        self.monitors.lock().await.remove(&handle_id);
    }

    pub async fn get_task_details(&self, task_id: &str) -> TaskResult<TaskRow> {
        task::get_task(&self.pool, task_id).await
    }

    pub async fn list_tasks(&self, filters: TaskFilters, sort: SortSpec, skip: i64, limit: i64) -> TaskResult<Page> {
        task::get_tasks(&self.pool, filters, sort, skip, limit).await
    }

    /// Wraps the runner call: on any failure, returns a single synthesized
    /// ERROR entry instead of propagating, matching the original's defensive
    /// read path.
    pub async fn get_task_logs(&self, task_id: &str, level: Option<LogLevel>) -> TaskResult<Vec<LogEntry>> {
        let task = task::get_task(&self.pool, task_id).await?;
        let Ok(runner) = self.registry.get(&task.task_type) else {
            return Ok(vec![synthesized_error_entry("no runner registered for this task's type")]);
        };
        match runner.get_log_summary(&task, level).await {
            Ok(entries) => Ok(entries),
            Err(err) => Ok(vec![synthesized_error_entry(&err.to_string())]),
        }
    }

    pub async fn get_task_results(&self, task_id: &str) -> TaskResult<Json> {
        let task = task::get_task(&self.pool, task_id).await?;
        let data = task.result_summary.clone().unwrap_or(Json::Object(Default::default()));
        Ok(serde_json::json!({
            "task_id": task.task_id,
            "result_type": "task_summary",
            "data": data,
            "summary": format!("task {} is {}", task.task_id, task.status()),
        }))
    }

    /// Rejects unless the task is in a cancellable state; otherwise
    /// transitions to CANCELLING, asks the runner to cancel, and persists
    /// whatever terminal-or-cancelling status the runner reports back.
    pub async fn cancel_task(&self, task_id: &str, force: bool) -> TaskResult<TaskRow> {
        let task = task::get_task(&self.pool, task_id).await?;
        if !task.status().is_cancellable() {
            return Err(TaskError::TaskConflict(format!(
                "task {} is not in a cancellable state ({})",
                task_id,
                task.status()
            )));
        }

        task::update_task_status(&self.pool, task_id, TaskStatus::Cancelling, "user", StatusUpdate::default()).await?;

        let runner = self
            .registry
            .get(&task.task_type)
            .map_err(|e| TaskError::UnknownRunner(e.to_string()))?;

        let cancelled = runner
            .cancel(&task, force)
            .await
            .map_err(|e| TaskError::TaskExecution(e.to_string()))?;

        task::update_task_status(
            &self.pool,
            task_id,
            cancelled.status(),
            "user",
            StatusUpdate {
                error_info: cancelled.error_info,
                result_summary: cancelled.result_summary,
                execution_details: cancelled.execution_details,
                progress_details: cancelled.progress_details,
            },
        )
        .await
    }

    /// Raises a conflict unless the task has ended (terminal status or
    /// expired), then deletes its events and the row itself.
    pub async fn permanently_delete_task(&self, task_id: &str) -> TaskResult<()> {
        let task = task::get_task(&self.pool, task_id).await?;
        if !task.has_ended() {
            return Err(TaskError::TaskConflict(format!(
                "task {} has not ended and has not expired",
                task_id
            )));
        }
        task::hard_delete_task(&self.pool, task_id).await
    }

    /// Aborts every tracked monitor and asks every registered runner to free
    /// its resources. Called once at process shutdown.
    pub async fn shutdown(&self) {
        let mut monitors = self.monitors.lock().await;
        for (_, handle) in monitors.drain() {
            handle.abort();
        }
        drop(monitors);
        self.registry.shutdown_all().await;
    }
}

fn synthesized_error_entry(message: &str) -> LogEntry {
    LogEntry {
        timestamp: chrono::Utc::now().timestamp_millis(),
        level: LogLevel::Error,
        message: message.to_string(),
    }
}
