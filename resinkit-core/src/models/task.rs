/// Task entity and persistence (C5 + the durable half of C6)
///
/// Mirrors the state-machine idiom of the teacher crate's task model: an enum
/// with `as_str`/`is_terminal` helpers, a `sqlx::FromRow` struct, and
/// compare-and-set `UPDATE ... WHERE status = $expected` transitions. Unlike
/// the teacher's four-state lifecycle this one carries the full ten-state
/// lifecycle and JSON-document fields the original service's `db/models.py`
/// `Task` row used.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;
use sqlx::PgPool;

use crate::error::{TaskError, TaskResult};
use crate::models::task_event::TaskEvent;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Submitted,
    Validating,
    Preparing,
    Building,
    Running,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Validating => "VALIDATING",
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::Building => "BUILDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelling => "CANCELLING",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parses a status string. Unknown values degrade to `FAILED` rather
    /// than erroring, matching the original service's `TaskStatus.from_str`
    /// (a row with a status the current binary no longer recognizes should
    /// not become unreadable).
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "PENDING" => TaskStatus::Pending,
            "SUBMITTED" => TaskStatus::Submitted,
            "VALIDATING" => TaskStatus::Validating,
            "PREPARING" => TaskStatus::Preparing,
            "BUILDING" => TaskStatus::Building,
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "CANCELLING" => TaskStatus::Cancelling,
            "CANCELLED" => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States `cancel_task` will still accept.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending
                | TaskStatus::Validating
                | TaskStatus::Preparing
                | TaskStatus::Running
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wraps [`TaskStatus`] so it can be produced from a raw `TEXT` column via
/// `#[sqlx(try_from = "String")]`, and round-tripped through serde, without
/// status parsing ever being fallible (see [`TaskStatus::from_str_lenient`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatusColumn(pub TaskStatus);

impl TryFrom<String> for TaskStatusColumn {
    type Error = std::convert::Infallible;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(TaskStatusColumn(TaskStatus::from_str_lenient(&s)))
    }
}

impl Serialize for TaskStatusColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatusColumn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TaskStatusColumn(TaskStatus::from_str_lenient(&s)))
    }
}

/// The primary durable entity (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub task_name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatusColumn,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub submitted_configs: Json,
    pub error_info: Option<Json>,
    pub result_summary: Option<Json>,
    pub execution_details: Option<Json>,
    pub progress_details: Option<Json>,
    pub notification_config: Option<Json>,
    pub tags: Json,
    pub created_by: String,
    pub active: bool,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        self.status.0
    }

    /// `now > expires_at`, where `expires_at` was derived from
    /// `task_timeout_seconds` at creation time (§3, §4.2).
    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// `status ∈ terminal ∨ expired()` (§4.2). Broader than the original
    /// service's `TaskBase.has_ended`, which only checked FAILED/COMPLETED —
    /// see DESIGN.md for why this spec's wording is authoritative.
    pub fn has_ended(&self) -> bool {
        self.status().is_terminal() || self.expired()
    }

    /// Returns a clone of this task with `status` replaced. Runners work
    /// against in-memory copies of a task row (they don't write to the
    /// database themselves) and use this to report a new status back to the
    /// task manager, which persists it via `update_task_status`.
    pub fn with_status(&self, status: TaskStatus) -> Task {
        let mut next = self.clone();
        next.status = TaskStatusColumn(status);
        next
    }
}

/// Fields accepted to create a task row.
pub struct CreateTask {
    pub task_id: String,
    pub task_type: String,
    pub task_name: String,
    pub description: Option<String>,
    pub priority: i32,
    pub submitted_configs: Json,
    pub notification_config: Option<Json>,
    pub tags: Vec<String>,
    pub created_by: String,
    pub task_timeout_seconds: Option<i64>,
}

/// Optional fields `update_task_status` may persist alongside a transition.
#[derive(Default)]
pub struct StatusUpdate {
    pub error_info: Option<Json>,
    pub result_summary: Option<Json>,
    pub execution_details: Option<Json>,
    pub progress_details: Option<Json>,
}

/// Filter/sort/pagination parameters for `get_tasks` (§4.1).
#[derive(Default)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub created_by: Option<String>,
    pub task_name_contains: Option<String>,
    pub tags_include_any: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub active_only: bool,
}

pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec {
            field: "created_at".to_string(),
            descending: true,
        }
    }
}

pub struct Page {
    pub tasks: Vec<Task>,
    pub has_more: bool,
    pub next_offset: i64,
}

pub async fn create_task(pool: &PgPool, input: CreateTask) -> TaskResult<Task> {
    let now = Utc::now();
    let expires_at = input
        .task_timeout_seconds
        .map(|secs| now + chrono::Duration::seconds(secs));

    let task = sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (
            task_id, task_type, task_name, description, status, priority,
            created_at, updated_at, expires_at, submitted_configs,
            notification_config, tags, created_by, active
        )
        VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $6, $7, $8, $9, $10, $11, TRUE)
        RETURNING *
        "#,
    )
    .bind(&input.task_id)
    .bind(&input.task_type)
    .bind(&input.task_name)
    .bind(&input.description)
    .bind(input.priority)
    .bind(now)
    .bind(expires_at)
    .bind(&input.submitted_configs)
    .bind(&input.notification_config)
    .bind(Json::from(input.tags))
    .bind(&input.created_by)
    .fetch_one(pool)
    .await?;

    TaskEvent::append(
        pool,
        &task.task_id,
        "CREATED",
        None,
        Some(TaskStatus::Pending),
        "system",
        None,
    )
    .await?;

    Ok(task)
}

pub async fn get_task(pool: &PgPool, task_id: &str) -> TaskResult<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = $1 AND active")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))
}

const ALLOWED_SORT_FIELDS: &[&str] = &["created_at", "updated_at", "priority", "status"];

pub async fn get_tasks(
    pool: &PgPool,
    filters: TaskFilters,
    sort: SortSpec,
    skip: i64,
    limit: i64,
) -> TaskResult<Page> {
    let field = if ALLOWED_SORT_FIELDS.contains(&sort.field.as_str()) {
        sort.field.as_str()
    } else {
        "created_at"
    };
    let direction = if sort.descending { "DESC" } else { "ASC" };

    let mut sql = String::from("SELECT * FROM tasks WHERE 1 = 1");
    if filters.active_only {
        sql.push_str(" AND active");
    }

    let mut idx = 1;
    let mut binds: Vec<String> = Vec::new();
    macro_rules! add_clause {
        ($clause:expr, $value:expr) => {{
            sql.push_str(&format!(" AND {}", $clause.replace("{}", &format!("${}", idx))));
            binds.push($value);
            idx += 1;
        }};
    }

    if let Some(status) = &filters.status {
        add_clause!("status = {}", status.as_str().to_string());
    }
    if let Some(task_type) = &filters.task_type {
        add_clause!("task_type = {}", task_type.clone());
    }
    if let Some(created_by) = &filters.created_by {
        add_clause!("created_by = {}", created_by.clone());
    }
    if let Some(contains) = &filters.task_name_contains {
        add_clause!("task_name ILIKE {}", format!("%{}%", contains));
    }
    if let Some(after) = &filters.created_after {
        add_clause!("created_at >= {}", after.to_rfc3339());
    }
    if let Some(before) = &filters.created_before {
        add_clause!("created_at < {}", before.to_rfc3339());
    }

    // `?|` matches if any of the given strings is a top-level element of the
    // `tags` JSONB array; pushed into the WHERE clause so it composes with
    // the LIMIT/OFFSET probe below instead of discarding rows after the page
    // window has already been fetched.
    let tags_idx = if !filters.tags_include_any.is_empty() {
        sql.push_str(&format!(" AND tags ?| ${}", idx));
        idx += 1;
        true
    } else {
        false
    };

    // limit+1 probe to detect has_more (§4.1), with sort/skip applied.
    sql.push_str(&format!(
        " ORDER BY {field} {direction} LIMIT ${lim} OFFSET ${off}",
        field = field,
        direction = direction,
        lim = idx,
        off = idx + 1
    ));

    let mut query = sqlx::query_as::<_, Task>(&sql);
    for b in &binds {
        query = query.bind(b);
    }
    if tags_idx {
        query = query.bind(&filters.tags_include_any);
    }
    query = query.bind(limit + 1).bind(skip);

    let mut rows = query.fetch_all(pool).await?;

    let has_more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);

    Ok(Page {
        tasks: rows,
        has_more,
        next_offset: skip + limit,
    })
}

/// `update_task_status` MUST, in one transaction: load the row, bump
/// `updated_at`, set `started_at` on first RUNNING, set `finished_at` on any
/// terminal, write the new status, persist provided JSON fields, and append a
/// `STATUS_CHANGE` `TaskEvent` (§4.1).
pub async fn update_task_status(
    pool: &PgPool,
    task_id: &str,
    new_status: TaskStatus,
    actor: &str,
    update: StatusUpdate,
) -> TaskResult<Task> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = $1 FOR UPDATE")
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;

    let previous_status = current.status();
    let now = Utc::now();
    let started_at = current
        .started_at
        .or((new_status == TaskStatus::Running).then_some(now));
    let finished_at = current
        .finished_at
        .or(new_status.is_terminal().then_some(now));

    let updated = sqlx::query_as::<_, Task>(
        r#"
        UPDATE tasks SET
            status = $2,
            updated_at = $3,
            started_at = COALESCE($4, started_at),
            finished_at = COALESCE($5, finished_at),
            error_info = COALESCE($6, error_info),
            result_summary = COALESCE($7, result_summary),
            execution_details = COALESCE($8, execution_details),
            progress_details = COALESCE($9, progress_details)
        WHERE task_id = $1
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(new_status.as_str())
    .bind(now)
    .bind(started_at)
    .bind(finished_at)
    .bind(&update.error_info)
    .bind(&update.result_summary)
    .bind(&update.execution_details)
    .bind(&update.progress_details)
    .fetch_one(&mut *tx)
    .await?;

    let event_data = match (&update.error_info, &update.result_summary) {
        (Some(e), _) => Some(serde_json::json!({ "error_info": e })),
        (None, Some(r)) => Some(serde_json::json!({ "result_summary": r })),
        (None, None) => None,
    };

    TaskEvent::append(
        &mut *tx,
        task_id,
        "STATUS_CHANGE",
        Some(previous_status),
        Some(new_status),
        actor,
        event_data,
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Soft-delete: flips `active = FALSE`.
pub async fn delete_task(pool: &PgPool, task_id: &str) -> TaskResult<()> {
    let result = sqlx::query("UPDATE tasks SET active = FALSE, updated_at = NOW() WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TaskError::TaskNotFound(task_id.to_string()));
    }
    Ok(())
}

/// Hard delete: events then the row. Caller (`TaskManager::permanently_delete_task`)
/// is responsible for enforcing the terminal-or-expired precondition (§4.9).
pub async fn hard_delete_task(pool: &PgPool, task_id: &str) -> TaskResult<()> {
    let mut tx = pool.begin().await?;
    TaskEvent::delete_for_task(&mut *tx, task_id).await?;
    let result = sqlx::query("DELETE FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TaskError::TaskNotFound(task_id.to_string()));
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str_lenient(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_degrades_to_failed() {
        assert_eq!(TaskStatus::from_str_lenient("TIMEOUT"), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_str_lenient("garbage"), TaskStatus::Failed);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn cancellable_states() {
        assert!(TaskStatus::Pending.is_cancellable());
        assert!(TaskStatus::Validating.is_cancellable());
        assert!(TaskStatus::Preparing.is_cancellable());
        assert!(TaskStatus::Running.is_cancellable());
        assert!(!TaskStatus::Completed.is_cancellable());
        assert!(!TaskStatus::Cancelling.is_cancellable());
    }
}
