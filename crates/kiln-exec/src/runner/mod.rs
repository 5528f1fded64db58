//! Runner backends and the factory that picks one per job.

mod host;
pub use host::HostRunner;

mod docker;
pub use docker::DockerRunner;

pub mod firecracker;
pub use firecracker::{FirecrackerOptions, FirecrackerRunner};

#[cfg(feature = "kubernetes")]
pub mod kubernetes;
#[cfg(feature = "kubernetes")]
pub use kubernetes::{KubernetesOptions, KubernetesRunner};

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use kiln_core::{
    CmdRunner, CommandRunner, MetricsHandle, NameSet, Runner, RunnerError, RunnerState, VmStartLock,
};
use kiln_log::ExecutionLogger;
use kiln_model::{DockerAuthConfig, StepSpec};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::command::DockerOptions;

/// Everything a runner needs from the engine around it.
#[derive(Clone)]
pub struct RunnerContext {
    pub logger: Arc<ExecutionLogger>,
    pub commands: Arc<dyn CommandRunner>,
    pub host: Arc<dyn CmdRunner>,
    pub metrics: MetricsHandle,
    pub lock: VmStartLock,
    pub names: NameSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Steps run directly on the host; container steps use the local engine.
    #[default]
    Host,
    /// Like `Host`, with registry credentials staged for the container engine.
    Docker,
    /// Each job gets its own micro-VM backed by a loop-mounted workspace.
    Firecracker,
    #[cfg(feature = "kubernetes")]
    Kubernetes,
}

impl BackendKind {
    /// Whether the workspace must be an ext4 block device rather than a directory.
    pub fn uses_block_device(self) -> bool {
        matches!(self, BackendKind::Firecracker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerOptions {
    pub backend: BackendKind,
    /// Prefix of every VM name; the janitor only considers VMs carrying it.
    pub vm_prefix: String,
    /// Leave workspaces in place after the job for inspection.
    pub keep_workspaces: bool,
    pub docker: DockerOptions,
    pub firecracker: FirecrackerOptions,
    #[cfg(feature = "kubernetes")]
    pub kubernetes: KubernetesOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            vm_prefix: "kiln".into(),
            keep_workspaces: false,
            docker: DockerOptions::default(),
            firecracker: FirecrackerOptions::default(),
            #[cfg(feature = "kubernetes")]
            kubernetes: KubernetesOptions::default(),
        }
    }
}

/// The runner chosen for a job.
pub enum Backend {
    Host(HostRunner),
    Docker(DockerRunner),
    Firecracker(FirecrackerRunner),
    #[cfg(feature = "kubernetes")]
    Kubernetes(KubernetesRunner),
}

impl Backend {
    /// Build the runner for `options.backend`.
    ///
    /// `workspace` is the directory for host-side backends and the block device for VMs.
    pub fn new(
        options: &RunnerOptions,
        ctx: RunnerContext,
        workspace: &Path,
        auth: &DockerAuthConfig,
    ) -> Self {
        match options.backend {
            BackendKind::Host => Backend::Host(HostRunner::new(ctx, workspace, options.docker.clone())),
            BackendKind::Docker => Backend::Docker(DockerRunner::new(
                ctx,
                workspace,
                options.docker.clone(),
                auth.clone(),
            )),
            BackendKind::Firecracker => Backend::Firecracker(FirecrackerRunner::new(
                ctx,
                vm_name(&options.vm_prefix),
                workspace,
                options.firecracker.clone(),
                options.docker.clone(),
                auth.clone(),
            )),
            #[cfg(feature = "kubernetes")]
            BackendKind::Kubernetes => Backend::Kubernetes(KubernetesRunner::new(
                ctx,
                workspace,
                options.kubernetes.clone(),
                options.docker.resources.clone(),
            )),
        }
    }

    fn inner(&self) -> &dyn Runner {
        match self {
            Backend::Host(r) => r,
            Backend::Docker(r) => r,
            Backend::Firecracker(r) => r,
            #[cfg(feature = "kubernetes")]
            Backend::Kubernetes(r) => r,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Runner {
        match self {
            Backend::Host(r) => r,
            Backend::Docker(r) => r,
            Backend::Firecracker(r) => r,
            #[cfg(feature = "kubernetes")]
            Backend::Kubernetes(r) => r,
        }
    }
}

#[async_trait]
impl Runner for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn state(&self) -> RunnerState {
        self.inner().state()
    }

    async fn setup(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError> {
        self.inner_mut().setup(cancel).await
    }

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError> {
        self.inner().run(cancel, spec).await
    }

    async fn teardown(&mut self) -> Result<(), RunnerError> {
        self.inner_mut().teardown().await
    }
}

/// Unique VM name: `<prefix>-<uuid v4>`.
pub fn vm_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Fresh temp directory that outlives its handle; the runner removes it in teardown.
pub(crate) fn make_temp_dir(prefix: &str) -> Result<PathBuf, RunnerError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map(|dir| dir.keep())
        .map_err(|e| RunnerError::io("create temp dir", e))
}

/// Remove a runner-owned temp directory; a directory that is already gone is fine.
pub(crate) async fn remove_temp_dir(dir: &Path) -> Result<(), RunnerError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunnerError::io(format!("remove {}", dir.display()), e)),
    }
}

/// Write `<dir>/config.json` with the registry credentials and return `dir`.
pub(crate) async fn write_docker_auth(dir: &Path, auth: &DockerAuthConfig) -> Result<PathBuf, RunnerError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RunnerError::io("create docker auth dir", e))?;
    let body = serde_json::to_vec_pretty(auth).map_err(|e| RunnerError::Serialize {
        context: "docker auth config".into(),
        reason: e.to_string(),
    })?;
    let file = dir.join("config.json");
    tokio::fs::write(&file, body)
        .await
        .map_err(|e| RunnerError::io("write docker auth config", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| RunnerError::io("chmod docker auth config", e))?;
    }
    Ok(dir.to_path_buf())
}
