/// Tagged-variant task types and their validation rules (§4.2, §6)
///
/// Grounded on the original service's `task_base.py` (task id format),
/// `flink/flink_cdc_pipeline_task.py`, and `flink/flink_sql_task.py`. Task
/// type tags (`flink_cdc_pipeline`, `flink_sql`) match the original
/// runner-registry keys verbatim.
use serde_json::Value as JsonValue;

use resinkit_core::variables::short_id;

use crate::runner::{RunnerError, RunnerResult};

pub const CDC_PIPELINE_TASK_TYPE: &str = "flink_cdc_pipeline";
pub const SQL_TASK_TYPE: &str = "flink_sql";

/// `lower(task_type) + "_" + 9-char base57 id`.
pub fn generate_task_id(task_type: &str) -> String {
    format!("{}_{}", task_type.to_lowercase(), short_id(9))
}

/// Only asserts presence of `task_type`; concrete variants layer their own
/// checks on top.
pub fn validate_base(config: &JsonValue) -> RunnerResult<()> {
    if config.get("task_type").and_then(JsonValue::as_str).is_none() {
        return Err(RunnerError::InvalidConfig("missing 'task_type'".to_string()));
    }
    Ok(())
}

/// `{job, runtime, resources}` — the CDC pipeline variant's submitted config.
pub fn validate_cdc_pipeline_config(config: &JsonValue) -> RunnerResult<()> {
    validate_base(config)?;

    if config.get("job").map_or(true, JsonValue::is_null) {
        return Err(RunnerError::InvalidConfig("missing required 'job' configuration".to_string()));
    }
    if let Some(runtime) = config.get("runtime") {
        if !runtime.is_null() && !runtime.is_object() {
            return Err(RunnerError::InvalidConfig("runtime configuration must be an object".to_string()));
        }
    }
    if let Some(resources) = config.get("resources") {
        if !resources.is_null() && !resources.is_object() {
            return Err(RunnerError::InvalidConfig("resources configuration must be an object".to_string()));
        }
    }
    Ok(())
}

pub fn cdc_log_file(task_id: &str) -> String {
    format!("/tmp/flink_cdc_{}.log", task_id)
}

pub fn sql_log_file(task_id: &str) -> String {
    format!("/tmp/flink_sql_{}.log", task_id)
}

/// `{job.sql, job.pipeline.{name, parallelism}, resources}` — the SQL
/// variant's submitted config.
pub fn validate_sql_config(config: &JsonValue) -> RunnerResult<()> {
    validate_base(config)?;

    let sql = config
        .get("job")
        .and_then(|j| j.get("sql"))
        .and_then(JsonValue::as_str)
        .unwrap_or("");
    let statements = split_sql_statements(sql);
    if statements.is_empty() {
        return Err(RunnerError::InvalidConfig("SQL job must contain at least one statement".to_string()));
    }

    if let Some(parallelism) = config.get("job").and_then(|j| j.get("pipeline")).and_then(|p| p.get("parallelism")) {
        if parallelism.as_i64().map_or(true, |p| p <= 0) {
            return Err(RunnerError::InvalidConfig("pipeline.parallelism must be > 0".to_string()));
        }
    }

    if let Some(jars) = config.get("resources").and_then(|r| r.get("flink_jars")).and_then(JsonValue::as_array) {
        for jar in jars {
            let has_name = jar.get("name").and_then(JsonValue::as_str).is_some();
            let has_location_or_source = jar.get("location").is_some() || jar.get("source").is_some();
            if !has_name || !has_location_or_source {
                return Err(RunnerError::InvalidConfig(
                    "each flink_jars entry needs a name and either a location or a source".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Splits a SQL script into individual statements on a terminating `;` at
/// line-end, skipping blank and `--`-prefixed lines. Deliberately simpler
/// than the original's `_parse_sql_statements`: that function tracked
/// `in_string`/`string_delimiter` variables that were never actually
/// updated, so quoted semicolons were never really honored there either
/// (see DESIGN.md).
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_has_expected_shape() {
        let id = generate_task_id("FLINK_SQL");
        assert!(id.starts_with("flink_sql_"));
        assert_eq!(id.len(), "flink_sql_".len() + 9);
    }

    #[test]
    fn splits_statements_on_trailing_semicolon() {
        let sql = "SELECT 1;\nSELECT 2;";
        assert_eq!(split_sql_statements(sql), vec!["SELECT 1;", "SELECT 2;"]);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let sql = "-- a comment\n\nSELECT 1;\n-- trailing comment\nSELECT 2;";
        assert_eq!(split_sql_statements(sql), vec!["SELECT 1;", "SELECT 2;"]);
    }

    #[test]
    fn multiline_statement_accumulates_until_semicolon() {
        let sql = "CREATE TABLE t (\n  a INT\n);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("CREATE TABLE t"));
    }

    #[test]
    fn rejects_cdc_config_without_job() {
        let config = serde_json::json!({ "task_type": "flink_cdc_pipeline" });
        assert!(validate_cdc_pipeline_config(&config).is_err());
    }

    #[test]
    fn accepts_minimal_cdc_config() {
        let config = serde_json::json!({
            "task_type": "flink_cdc_pipeline",
            "job": { "source": "mysql" },
        });
        assert!(validate_cdc_pipeline_config(&config).is_ok());
    }

    #[test]
    fn rejects_sql_config_with_no_statements() {
        let config = serde_json::json!({
            "task_type": "flink_sql",
            "job": { "sql": "-- nothing but a comment" },
        });
        assert!(validate_sql_config(&config).is_err());
    }
}
