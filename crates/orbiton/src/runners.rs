use std::sync::Arc;

use agent_runner::{AgentRunner, RunnerInitError};
use agent_runner_mock::{MockRunner, MOCK_RUNNER_ID};

pub const DEFAULT_RUNNER_ID: &str = MOCK_RUNNER_ID;

/// Resolves a configured runner id to a runner instance.
pub fn runner_for_id(runner_id: &str) -> Result<Arc<dyn AgentRunner>, RunnerInitError> {
    match runner_id {
        MOCK_RUNNER_ID => Ok(Arc::new(MockRunner::default())),
        unknown => Err(RunnerInitError::new(format!(
            "Unsupported runner '{unknown}'. Available runners: {MOCK_RUNNER_ID}"
        ))),
    }
}
