/// Task event journal
///
/// An append-only audit trail of status transitions, recorded alongside
/// every `tasks` row (§3). This drops the teacher's SHA-256 hash-chaining —
/// tamper evidence is out of scope here (see DESIGN.md) — and keeps a plain
/// immutable row per transition instead.
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::PgExecutor;

use crate::error::TaskResult;
use crate::models::task::TaskStatus;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct TaskEvent {
    pub event_id: i64,
    pub task_id: String,
    pub event_type: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub actor: String,
    pub event_data: Option<Json>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    /// Appends one event row. Accepts anything that implements
    /// [`sqlx::PgExecutor`] so callers can pass either a pool (outside a
    /// transaction, e.g. task creation) or a `&mut Transaction` (inside one,
    /// e.g. a status update that must be atomic with the `tasks` row write).
    pub async fn append<'e, E>(
        executor: E,
        task_id: &str,
        event_type: &str,
        previous_status: Option<TaskStatus>,
        new_status: Option<TaskStatus>,
        actor: &str,
        event_data: Option<Json>,
    ) -> TaskResult<TaskEvent>
    where
        E: PgExecutor<'e>,
    {
        let event = sqlx::query_as::<_, TaskEvent>(
            r#"
            INSERT INTO task_events (
                task_id, event_type, previous_status, new_status, actor, event_data, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(event_type)
        .bind(previous_status.map(|s| s.as_str().to_string()))
        .bind(new_status.map(|s| s.as_str().to_string()))
        .bind(actor)
        .bind(event_data)
        .fetch_one(executor)
        .await?;

        Ok(event)
    }

    /// Events for a task, oldest first.
    pub async fn query_range<'e, E>(executor: E, task_id: &str) -> TaskResult<Vec<TaskEvent>>
    where
        E: PgExecutor<'e>,
    {
        let events = sqlx::query_as::<_, TaskEvent>(
            "SELECT * FROM task_events WHERE task_id = $1 ORDER BY timestamp ASC, event_id ASC",
        )
        .bind(task_id)
        .fetch_all(executor)
        .await?;

        Ok(events)
    }

    /// Most recent event for a task, if any.
    pub async fn get_latest<'e, E>(executor: E, task_id: &str) -> TaskResult<Option<TaskEvent>>
    where
        E: PgExecutor<'e>,
    {
        let event = sqlx::query_as::<_, TaskEvent>(
            "SELECT * FROM task_events WHERE task_id = $1 ORDER BY timestamp DESC, event_id DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(executor)
        .await?;

        Ok(event)
    }

    /// Removes all events for a task. Used by `hard_delete_task` ahead of
    /// removing the task row itself (the FK carries `ON DELETE CASCADE`, but
    /// callers that delete events in the same transaction as the row make
    /// the intent explicit).
    pub async fn delete_for_task<'e, E>(executor: E, task_id: &str) -> TaskResult<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("DELETE FROM task_events WHERE task_id = $1")
            .bind(task_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
