/// Runner registry (C7, §4.3)
///
/// A process-wide `task_type → runner` map, grounded on the teacher's
/// `HashMap<String, Arc<dyn Adapter>>` field in its orchestrator. Register
/// at startup; lookup is O(1); unknown types fail with a typed error the
/// task manager surfaces as terminal FAILED.
use std::collections::HashMap;
use std::sync::Arc;

use crate::runner::{Runner, RunnerError, RunnerResult};

#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        RunnerRegistry::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, runner: Arc<dyn Runner>) {
        self.runners.insert(task_type.into(), runner);
    }

    pub fn get(&self, task_type: &str) -> RunnerResult<Arc<dyn Runner>> {
        self.runners
            .get(task_type)
            .cloned()
            .ok_or_else(|| RunnerError::InvalidConfig(format!("no runner registered for task type '{}'", task_type)))
    }

    pub async fn shutdown_all(&self) {
        for runner in self.runners.values() {
            runner.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::mock::MockRunner;

    #[test]
    fn lookup_unknown_type_fails() {
        let registry = RunnerRegistry::new();
        assert!(registry.get("no_such_type").is_err());
    }

    #[test]
    fn lookup_registered_type_succeeds() {
        let mut registry = RunnerRegistry::new();
        registry.register("mock_task", Arc::new(MockRunner::default()));
        assert!(registry.get("mock_task").is_ok());
    }
}
