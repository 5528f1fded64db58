use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::{Runner, RunnerError, RunnerState};
use kiln_model::StepSpec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::RunnerContext;
use crate::command::{DockerOptions, step_command};

/// Runs steps directly on the host against a workspace directory.
pub struct HostRunner {
    ctx: RunnerContext,
    workspace: PathBuf,
    pub(crate) options: DockerOptions,
    pub(crate) state: RunnerState,
}

impl HostRunner {
    pub fn new(ctx: RunnerContext, workspace: &Path, options: DockerOptions) -> Self {
        Self {
            ctx,
            workspace: workspace.to_path_buf(),
            options,
            state: RunnerState::Created,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[async_trait]
impl Runner for HostRunner {
    fn name(&self) -> &'static str {
        "host"
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn setup(&mut self, _cancel: &CancellationToken) -> Result<(), RunnerError> {
        if self.state != RunnerState::Created {
            return Err(RunnerError::NotReady(self.state));
        }
        self.state = RunnerState::Ready;
        Ok(())
    }

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError> {
        self.state.ensure_ready()?;
        let cmd = step_command(&self.workspace, spec, &self.options)?;
        debug!(target: "kiln.exec.runner", key = %spec.key, "run on host");
        self.ctx
            .commands
            .run(cancel, &self.ctx.logger, cmd)
            .await
            .map_err(|e| RunnerError::command(&spec.key, e))
    }

    async fn teardown(&mut self) -> Result<(), RunnerError> {
        self.state = RunnerState::Closed;
        Ok(())
    }
}
