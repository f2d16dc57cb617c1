//! # Resinkit Worker
//!
//! Task execution library: the runner contract, concrete runners for the
//! Flink CDC pipeline and SQL gateway task types, the resource/gateway-client
//! helpers they depend on, and the task manager that drives the full
//! submit/monitor/cancel lifecycle.
//!
//! ## Modules
//!
//! - `runner`: the `Runner` trait every concrete runner implements
//! - `registry`: `task_type -> Arc<dyn Runner>` lookup
//! - `task_types`: tagged task-type validation and the SQL statement splitter
//! - `resource_manager`: Flink jar/classpath resolution
//! - `gateway_client`: SQL gateway session/operation abstraction
//! - `runners`: the CDC pipeline, SQL, and mock runners
//! - `task_manager`: task lifecycle orchestration

pub mod gateway_client;
pub mod registry;
pub mod resource_manager;
pub mod runner;
pub mod runners;
pub mod task_manager;
pub mod task_types;
