/// Variable store (§3.1): encrypted named values plus the system-variable
/// overlay consumed by the template resolver.
///
/// Grounded on the original service's `db/variables_crud.py`, re-expressed
/// against sqlx and the crate's AES-GCM scheme ([`crate::crypto`]) in place
/// of direct Fernet calls.
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::crypto;
use crate::error::{TaskError, TaskResult};
use crate::variables::get_system_variables;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Variable {
    pub name: String,
    pub encrypted_value: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create_variable(
    pool: &PgPool,
    passphrase: &str,
    name: &str,
    value: &str,
    description: Option<&str>,
    created_by: &str,
) -> TaskResult<Variable> {
    let encrypted_value = crypto::encrypt_value(passphrase, value)
        .map_err(|e| TaskError::UnprocessableTask(e.to_string()))?;

    let variable = sqlx::query_as::<_, Variable>(
        r#"
        INSERT INTO variables (name, encrypted_value, description, created_by, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(encrypted_value)
    .bind(description)
    .bind(created_by)
    .fetch_one(pool)
    .await?;

    Ok(variable)
}

pub async fn get_variable(pool: &PgPool, name: &str) -> TaskResult<Variable> {
    sqlx::query_as::<_, Variable>("SELECT * FROM variables WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| TaskError::TaskNotFound(name.to_string()))
}

/// Fetches a variable and decrypts its value under `passphrase`. Decryption
/// fails open to an empty string (see [`crate::crypto::decrypt_value`]).
pub async fn get_variable_decrypted(pool: &PgPool, passphrase: &str, name: &str) -> TaskResult<String> {
    let variable = get_variable(pool, name).await?;
    Ok(crypto::decrypt_value(passphrase, &variable.encrypted_value))
}

pub async fn list_variables(pool: &PgPool) -> TaskResult<Vec<Variable>> {
    let variables = sqlx::query_as::<_, Variable>("SELECT * FROM variables ORDER BY name ASC")
        .fetch_all(pool)
        .await?;
    Ok(variables)
}

pub async fn update_variable(
    pool: &PgPool,
    passphrase: &str,
    name: &str,
    value: &str,
    description: Option<&str>,
) -> TaskResult<Variable> {
    let encrypted_value = crypto::encrypt_value(passphrase, value)
        .map_err(|e| TaskError::UnprocessableTask(e.to_string()))?;

    let variable = sqlx::query_as::<_, Variable>(
        r#"
        UPDATE variables
        SET encrypted_value = $2, description = COALESCE($3, description), updated_at = NOW()
        WHERE name = $1
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(encrypted_value)
    .bind(description)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| TaskError::TaskNotFound(name.to_string()))?;

    Ok(variable)
}

pub async fn delete_variable(pool: &PgPool, name: &str) -> TaskResult<()> {
    let result = sqlx::query("DELETE FROM variables WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TaskError::TaskNotFound(name.to_string()));
    }
    Ok(())
}

/// All user-defined variables, decrypted, merged with the system-variable
/// overlay. System variables win any name collision (§3.1, §4.4).
pub async fn get_all_variables_decrypted(
    pool: &PgPool,
    passphrase: &str,
) -> TaskResult<std::collections::HashMap<String, String>> {
    let variables = list_variables(pool).await?;

    let mut resolved: std::collections::HashMap<String, String> = variables
        .into_iter()
        .map(|v| (v.name.clone(), crypto::decrypt_value(passphrase, &v.encrypted_value)))
        .collect();

    resolved.extend(get_system_variables());

    Ok(resolved)
}
