/// Database models
///
/// - `task`: Background tasks and their lifecycle (§3)
/// - `task_event`: Append-only transition journal (§3)
/// - `variable`: Encrypted named values backing variable substitution (§3.1)
///
/// ```no_run
/// use resinkit_core::models::task::{create_task, CreateTask};
/// use resinkit_core::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let task = create_task(&pool, CreateTask {
///     task_id: "flink_sql_abc123def".to_string(),
///     task_type: "flink_sql".to_string(),
///     task_name: "nightly rollup".to_string(),
///     description: None,
///     priority: 0,
///     submitted_configs: serde_json::json!({}),
///     notification_config: None,
///     tags: vec![],
///     created_by: "scheduler".to_string(),
///     task_timeout_seconds: Some(3600),
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub mod task;
pub mod task_event;
pub mod variable;
