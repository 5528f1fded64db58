use async_trait::async_trait;
use kiln_model::StepSpec;
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;

/// Lifecycle of a runner instance.
///
/// `Created → Ready → Closed`, or `Created → Failed → Closed` when setup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Ready,
    Failed,
    Closed,
}

impl RunnerState {
    pub fn ensure_ready(self) -> Result<(), RunnerError> {
        match self {
            RunnerState::Ready => Ok(()),
            other => Err(RunnerError::NotReady(other)),
        }
    }
}

/// Execution context for the steps of one job.
///
/// `teardown` takes no cancellation token: cleanup runs in its own scope so a job deadline
/// never abandons VM removal or temp-dir deletion halfway. It is idempotent and safe after a failed `setup`.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> RunnerState;

    async fn setup(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError>;

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError>;

    async fn teardown(&mut self) -> Result<(), RunnerError>;
}
