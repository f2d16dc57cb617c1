/// SQL gateway runner (C9, §4.8)
///
/// Opens a gateway session, executes a task's SQL statements in order
/// against it, and tracks the resulting operation handles so status/cancel
/// can be driven remotely. Grounded on the original service's
/// `flink_sql_runner.py`.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use resinkit_core::logfile::{LogFileManager, LogLevel};
use resinkit_core::models::task::{Task, TaskStatus};
use resinkit_core::variables::render_with_variables;

use crate::gateway_client::{GatewayClient, Operation, OperationStatus, ResultsFetchOpts, Session};
use crate::resource_manager::FlinkResourceManager;
use crate::runner::{LogEntry, Runner, RunnerError, RunnerResult};
use crate::task_types::{self, split_sql_statements, sql_log_file};

struct SessionState {
    session: Box<dyn Session>,
    operations: Vec<Box<dyn Operation>>,
}

pub struct SqlRunner {
    gateway: Arc<dyn GatewayClient>,
    flink_home: std::path::PathBuf,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SqlRunner {
    pub fn new(gateway: Arc<dyn GatewayClient>, flink_home: impl Into<std::path::PathBuf>) -> Self {
        SqlRunner {
            gateway,
            flink_home: flink_home.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

fn map_operation_status(status: OperationStatus) -> TaskStatus {
    match status {
        OperationStatus::Pending | OperationStatus::Running => TaskStatus::Running,
        OperationStatus::Finished => TaskStatus::Completed,
        OperationStatus::Error => TaskStatus::Failed,
    }
}

#[async_trait]
impl Runner for SqlRunner {
    fn name(&self) -> &str {
        task_types::SQL_TASK_TYPE
    }

    fn validate_config(&self, config: &JsonValue) -> RunnerResult<()> {
        task_types::validate_sql_config(config)
    }

    fn from_dao(&self, row: &Task, variables: &HashMap<String, String>) -> RunnerResult<JsonValue> {
        Ok(render_with_variables(&row.submitted_configs, variables))
    }

    async fn submit_task(&self, task: &Task, rendered: &JsonValue) -> RunnerResult<Task> {
        let sql = rendered.get("job").and_then(|j| j.get("sql")).and_then(JsonValue::as_str).unwrap_or("");
        let statements = split_sql_statements(sql);
        if statements.is_empty() {
            return Err(RunnerError::InvalidConfig("no SQL statements to execute".to_string()));
        }

        let pipeline = rendered.get("job").and_then(|j| j.get("pipeline")).cloned().unwrap_or(JsonValue::Null);
        let resources = rendered.get("resources").cloned().unwrap_or(JsonValue::Null);

        let resource_manager = FlinkResourceManager::new(&self.flink_home, None)
            .map_err(|e| RunnerError::Execution(e.to_string()))?;
        let processed = resource_manager.process_resources(&resources).await;

        let mut properties = HashMap::new();
        properties.insert("pipeline.jars".to_string(), processed.jar_paths.join(";"));
        properties.insert("pipeline.classpaths".to_string(), processed.classpath_jars.join(";"));
        if let Some(parallelism) = pipeline.get("parallelism").and_then(JsonValue::as_i64) {
            properties.insert("parallelism.default".to_string(), parallelism.to_string());
        }
        properties.insert("execution.runtime-mode".to_string(), "streaming".to_string());
        if let Some(name) = pipeline.get("name").and_then(JsonValue::as_str) {
            properties.insert("pipeline.name".to_string(), name.to_string());
        }

        let log_file_path = sql_log_file(&task.task_id);
        let log = LogFileManager::new(log_file_path.clone().into(), 1000).map_err(|e| RunnerError::Execution(e.to_string()))?;

        let session_name = format!("session_{}", task.task_id);
        let session = self
            .gateway
            .get_session(properties, &session_name, true)
            .await
            .map_err(|e| RunnerError::Execution(e.to_string()))?;
        log.info(&format!("opened gateway session '{}' (handle {})", session.name(), session.handle()));

        let mut operations: Vec<Box<dyn Operation>> = Vec::new();
        let mut result_rows: Vec<JsonValue> = Vec::new();
        let mut job_id = None;
        let mut is_query_result = false;
        let mut last_status = OperationStatus::Pending;

        for statement in &statements {
            log.info(&format!("executing statement: {}", statement));
            let operation = session
                .execute(statement)
                .await
                .map_err(|e| {
                    log.error(&format!("statement failed: {}", e));
                    RunnerError::Execution(e.to_string())
                })?;

            let (rows, meta) = operation
                .fetch(ResultsFetchOpts {
                    max_poll_secs: task.submitted_configs.get("connection_timeout_seconds").and_then(JsonValue::as_u64).unwrap_or(30),
                    poll_interval_secs: 0.5,
                    n_row_limit: 100,
                })
                .await
                .map_err(|e| RunnerError::Execution(e.to_string()))?;

            result_rows.extend(rows);
            job_id = meta.job_id.or(job_id);
            is_query_result = meta.is_query_result;
            last_status = operation
                .status()
                .await
                .map_err(|e| RunnerError::Execution(e.to_string()))?;
            operations.push(operation);
        }

        let session_id = session.handle().to_string();
        self.sessions.lock().await.insert(
            task.task_id.clone(),
            SessionState { session, operations },
        );

        log.info("session execution complete");

        let mut next = if last_status == OperationStatus::Finished {
            task.with_status(TaskStatus::Completed)
        } else {
            task.with_status(TaskStatus::Running)
        };
        next.result_summary = Some(serde_json::json!({
            "rows": result_rows,
            "job_id": job_id,
            "is_query_result": is_query_result,
        }));
        next.execution_details = Some(serde_json::json!({
            "log_file": log_file_path,
            "session_name": session_name,
            "session_id": session_id,
        }));
        Ok(next)
    }

    async fn fetch_task_status(&self, task: &Task) -> RunnerResult<Task> {
        let sessions = self.sessions.lock().await;
        let Some(state) = sessions.get(&task.task_id) else {
            return Ok(task.clone());
        };

        if !state.session.was_alive().await {
            return Ok(task.with_status(TaskStatus::Completed));
        }

        let Some(last_operation) = state.operations.last() else {
            return Ok(task.with_status(TaskStatus::Completed));
        };

        let status = last_operation.status().await.map_err(|e| RunnerError::Execution(e.to_string()))?;
        let mut next = task.with_status(map_operation_status(status));
        if next.status() == TaskStatus::Failed {
            next.error_info = Some(serde_json::json!({ "error": "operation reported ERROR status" }));
        }
        Ok(next)
    }

    async fn get_log_summary(&self, task: &Task, level: Option<LogLevel>) -> RunnerResult<Vec<LogEntry>> {
        let log = LogFileManager::new(sql_log_file(&task.task_id).into(), 1000).map_err(|e| RunnerError::Execution(e.to_string()))?;
        let entries = log.get_entries(level).map_err(|e| RunnerError::Execution(e.to_string()))?;
        Ok(entries
            .into_iter()
            .take(100)
            .map(|e| LogEntry {
                timestamp: e.timestamp,
                level: e.level,
                message: e.message,
            })
            .collect())
    }

    async fn get_result(&self, task: &Task) -> RunnerResult<Option<JsonValue>> {
        Ok(task.result_summary.clone())
    }

    async fn cancel(&self, task: &Task, _force: bool) -> RunnerResult<Task> {
        let sessions = self.sessions.lock().await;
        let Some(state) = sessions.get(&task.task_id) else {
            return Ok(task.with_status(TaskStatus::Cancelled));
        };

        if !state.session.was_alive().await {
            return Ok(task.with_status(TaskStatus::Completed));
        }

        for operation in &state.operations {
            let _ = operation.cancel().await;
        }
        Ok(task.with_status(TaskStatus::Cancelled))
    }

    async fn shutdown(&self) {
        let sessions = self.sessions.lock().await;
        for state in sessions.values() {
            for operation in &state.operations {
                let _ = operation.cancel().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_client::mock::MockGatewayClient;
    use chrono::Utc;

    fn sample_task(sql: &str) -> Task {
        Task {
            task_id: "flink_sql_testtest123".to_string(),
            task_type: task_types::SQL_TASK_TYPE.to_string(),
            task_name: "test".to_string(),
            description: None,
            status: resinkit_core::models::task::TaskStatusColumn(TaskStatus::Pending),
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            finished_at: None,
            expires_at: None,
            submitted_configs: serde_json::json!({ "job": { "sql": sql } }),
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
    async fn submits_and_completes_on_finished_operation() {
        let runner = SqlRunner::new(Arc::new(MockGatewayClient::default()), "/opt/flink");
        let task = sample_task("SELECT * FROM t;");
        let rendered = task.submitted_configs.clone();

        let result = runner.submit_task(&task, &rendered).await.unwrap();
        assert_eq!(result.status(), TaskStatus::Completed);
        assert!(result.result_summary.is_some());

        let details = result.execution_details.unwrap();
        assert!(details.get("log_file").and_then(JsonValue::as_str).is_some());
        assert!(details.get("session_name").and_then(JsonValue::as_str).is_some());
        assert!(details.get("session_id").and_then(JsonValue::as_str).is_some());

        std::fs::remove_file(details.get("log_file").unwrap().as_str().unwrap()).ok();
    }

    #[tokio::test]
    async fn log_summary_reads_back_entries_written_during_submit() {
        let runner = SqlRunner::new(Arc::new(MockGatewayClient::default()), "/opt/flink");
        let task = sample_task("SELECT * FROM t;");
        let rendered = task.submitted_configs.clone();

        let submitted = runner.submit_task(&task, &rendered).await.unwrap();
        let entries = runner.get_log_summary(&submitted, None).await.unwrap();
        assert!(!entries.is_empty());

        let log_file = submitted.execution_details.unwrap().get("log_file").unwrap().as_str().unwrap().to_string();
        std::fs::remove_file(log_file).ok();
    }

    #[tokio::test]
    async fn status_poll_reflects_last_operation() {
        let runner = SqlRunner::new(Arc::new(MockGatewayClient::default()), "/opt/flink");
        let task = sample_task("INSERT INTO t VALUES (1);");
        let rendered = task.submitted_configs.clone();

        let submitted = runner.submit_task(&task, &rendered).await.unwrap();
        let polled = runner.fetch_task_status(&submitted).await.unwrap();
        assert_eq!(polled.status(), TaskStatus::Completed);
    }
}
