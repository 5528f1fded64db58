use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::{Runner, RunnerError, RunnerState};
use kiln_model::{DockerAuthConfig, StepSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HostRunner, RunnerContext, make_temp_dir, remove_temp_dir, write_docker_auth};
use crate::command::DockerOptions;

/// Host runner that stages registry credentials in a private temp dir for the container engine.
pub struct DockerRunner {
    host: HostRunner,
    auth: DockerAuthConfig,
    temp_dir: Option<PathBuf>,
}

impl DockerRunner {
    pub fn new(ctx: RunnerContext, workspace: &Path, options: DockerOptions, auth: DockerAuthConfig) -> Self {
        Self {
            host: HostRunner::new(ctx, workspace, options),
            auth,
            temp_dir: None,
        }
    }

    async fn stage(&mut self) -> Result<(), RunnerError> {
        let dir = make_temp_dir("kiln-docker-")?;
        self.temp_dir = Some(dir.clone());
        if !self.auth.is_empty() {
            let config = write_docker_auth(&dir.join("docker_auth"), &self.auth).await?;
            self.host.options.config_path = Some(config);
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for DockerRunner {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn state(&self) -> RunnerState {
        self.host.state
    }

    async fn setup(&mut self, _cancel: &CancellationToken) -> Result<(), RunnerError> {
        if self.host.state != RunnerState::Created {
            return Err(RunnerError::NotReady(self.host.state));
        }
        match self.stage().await {
            Ok(()) => {
                self.host.state = RunnerState::Ready;
                debug!(target: "kiln.exec.runner", temp = ?self.temp_dir, "docker runner ready");
                Ok(())
            }
            Err(e) => {
                self.host.state = RunnerState::Failed;
                Err(e)
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError> {
        self.host.run(cancel, spec).await
    }

    async fn teardown(&mut self) -> Result<(), RunnerError> {
        self.host.state = RunnerState::Closed;
        if let Some(dir) = self.temp_dir.take() {
            if let Err(e) = remove_temp_dir(&dir).await {
                warn!(target: "kiln.exec.runner", error = %e, "failed to remove docker runner temp dir");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kiln_model::DockerAuth;

    use super::*;
    use crate::{runner::tests::context, testing::RecordingCommands};

    fn auth() -> DockerAuthConfig {
        let mut auth = DockerAuthConfig::default();
        auth.auths.insert("r.example.com".into(), DockerAuth { auth: "c2VjcmV0".into() });
        auth
    }

    #[tokio::test]
    async fn credentials_are_passed_and_removed() {
        let commands = Arc::new(RecordingCommands::default());
        let mut runner = DockerRunner::new(
            context(commands.clone()),
            Path::new("/ws"),
            DockerOptions::default(),
            auth(),
        );
        let cancel = CancellationToken::new();
        runner.setup(&cancel).await.unwrap();

        let temp = runner.temp_dir.clone().unwrap();
        assert!(temp.join("docker_auth/config.json").exists());

        runner
            .run(&cancel, &StepSpec::container("step.docker.0", "alpine", "s.sh"))
            .await
            .unwrap();
        let argv = &commands.argvs()[0];
        assert_eq!(argv[1], "--config");
        assert_eq!(argv[2], temp.join("docker_auth").display().to_string());

        runner.teardown().await.unwrap();
        assert!(!temp.exists());
        runner.teardown().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Closed);
    }

    #[tokio::test]
    async fn no_credentials_no_config_flag() {
        let commands = Arc::new(RecordingCommands::default());
        let mut runner = DockerRunner::new(
            context(commands.clone()),
            Path::new("/ws"),
            DockerOptions::default(),
            DockerAuthConfig::default(),
        );
        let cancel = CancellationToken::new();
        runner.setup(&cancel).await.unwrap();
        runner
            .run(&cancel, &StepSpec::container("step.docker.0", "alpine", "s.sh"))
            .await
            .unwrap();
        assert!(!commands.argvs()[0].iter().any(|a| a == "--config"));
        runner.teardown().await.unwrap();
    }
}
