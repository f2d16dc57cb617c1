/// SQL gateway session/operation client (C4, §4.8.1)
///
/// The SQL gateway itself is consumed, not reimplemented (per scope), but
/// its interface is part of this crate's compile surface: the SQL runner is
/// written against `GatewayClient`/`Session`/`Operation`, and a
/// `MockGatewayClient` backs unit tests the same way the teacher's
/// `MockAdapter` backs its orchestrator tests.
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway session error: {0}")]
    Session(String),

    #[error("gateway operation error: {0}")]
    Operation(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone)]
pub struct OperationResultMeta {
    pub job_id: Option<String>,
    pub is_query_result: bool,
}

/// Polling parameters for `Operation::fetch`.
#[derive(Debug, Clone)]
pub struct ResultsFetchOpts {
    pub max_poll_secs: u64,
    pub poll_interval_secs: f64,
    pub n_row_limit: usize,
}

#[async_trait]
pub trait Operation: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch(&self, opts: ResultsFetchOpts) -> GatewayResult<(Vec<JsonValue>, OperationResultMeta)>;

    async fn status(&self) -> GatewayResult<OperationStatus>;

    async fn cancel(&self) -> GatewayResult<()>;
}

#[async_trait]
pub trait Session: Send + Sync {
    fn name(&self) -> &str;

    /// The gateway-assigned session handle, distinct from `name` (the
    /// caller-chosen session label) — persisted in a task's
    /// `execution_details` alongside `session_name`.
    fn handle(&self) -> &str;

    async fn execute(&self, sql: &str) -> GatewayResult<Box<dyn Operation>>;

    /// Whether the remote session is still alive; a dead session means any
    /// outstanding operations have already been terminated remotely.
    async fn was_alive(&self) -> bool;
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn get_session(
        &self,
        properties: HashMap<String, String>,
        name: &str,
        create_if_not_exist: bool,
    ) -> GatewayResult<Box<dyn Session>>;
}

/// In-process, no-network gateway double for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct MockOperation {
        id: String,
        status: Mutex<OperationStatus>,
        rows: Vec<JsonValue>,
        job_id: Option<String>,
    }

    #[async_trait]
    impl Operation for MockOperation {
        fn id(&self) -> &str {
            &self.id
        }

        async fn fetch(&self, opts: ResultsFetchOpts) -> GatewayResult<(Vec<JsonValue>, OperationResultMeta)> {
            let rows = self.rows.iter().take(opts.n_row_limit).cloned().collect();
            Ok((
                rows,
                OperationResultMeta {
                    job_id: self.job_id.clone(),
                    is_query_result: !self.rows.is_empty(),
                },
            ))
        }

        async fn status(&self) -> GatewayResult<OperationStatus> {
            Ok(*self.status.lock().unwrap())
        }

        async fn cancel(&self) -> GatewayResult<()> {
            *self.status.lock().unwrap() = OperationStatus::Finished;
            Ok(())
        }
    }

    pub struct MockSession {
        name: String,
        handle: String,
        alive: std::sync::atomic::AtomicBool,
        next_op: AtomicUsize,
    }

    #[async_trait]
    impl Session for MockSession {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&self) -> &str {
            &self.handle
        }

        async fn execute(&self, sql: &str) -> GatewayResult<Box<dyn Operation>> {
            let idx = self.next_op.fetch_add(1, Ordering::SeqCst);
            let is_select = sql.trim_start().to_uppercase().starts_with("SELECT");
            Ok(Box::new(MockOperation {
                id: format!("{}-op-{}", self.name, idx),
                status: Mutex::new(OperationStatus::Finished),
                rows: if is_select {
                    vec![serde_json::json!({"col": 1})]
                } else {
                    vec![]
                },
                job_id: Some(format!("mock-job-{}", idx)),
            }))
        }

        async fn was_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub struct MockGatewayClient;

    #[async_trait]
    impl GatewayClient for MockGatewayClient {
        async fn get_session(
            &self,
            _properties: HashMap<String, String>,
            name: &str,
            _create_if_not_exist: bool,
        ) -> GatewayResult<Box<dyn Session>> {
            Ok(Box::new(MockSession {
                name: name.to_string(),
                handle: format!("{}-{}", name, uuid::Uuid::new_v4()),
                alive: std::sync::atomic::AtomicBool::new(true),
                next_op: AtomicUsize::new(0),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockGatewayClient;
    use super::*;

    #[tokio::test]
    async fn mock_session_executes_and_fetches() {
        let client = MockGatewayClient::default();
        let session = client.get_session(HashMap::new(), "session_test", true).await.unwrap();

        let op = session.execute("SELECT * FROM t;").await.unwrap();
        let (rows, meta) = op
            .fetch(ResultsFetchOpts {
                max_poll_secs: 5,
                poll_interval_secs: 0.5,
                n_row_limit: 100,
            })
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(meta.is_query_result);
        assert_eq!(op.status().await.unwrap(), OperationStatus::Finished);
    }

    #[tokio::test]
    async fn mock_session_reports_alive() {
        let client = MockGatewayClient::default();
        let session = client.get_session(HashMap::new(), "session_test", true).await.unwrap();
        assert!(session.was_alive().await);
    }
}
