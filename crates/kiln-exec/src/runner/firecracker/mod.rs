//! Micro-VM runner: one VM per job, steps executed through `ignite exec`.

pub mod cni;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::{ExecError, Runner, RunnerError, RunnerState};
use kiln_model::{
    BuiltCommand, DockerAuthConfig, Operation, ResourceLimits, StepEnv, StepSpec, VM_DOCKER_CONFIG_DIR,
    VM_DOCKER_DAEMON_CONFIG, VM_WORKSPACE_DIR,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RunnerContext, make_temp_dir, remove_temp_dir, write_docker_auth};
use crate::command::{DockerOptions, firecracker_command, sanitize_image};

const KERNEL_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off ip=dhcp random.trust_cpu=on \
                           i8042.noaux i8042.nomux i8042.nopnp i8042.dumbkbd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirecrackerOptions {
    /// Root filesystem image of the VM.
    pub image: String,
    pub kernel_image: String,
    pub sandbox_image: String,
    /// Script run inside the VM right after it boots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_startup_script_path: Option<String>,
    /// Registry mirrors written into the in-VM daemon config.
    pub docker_registry_mirror_urls: Vec<String>,
}

impl Default for FirecrackerOptions {
    fn default() -> Self {
        Self {
            image: "kiln/executor-vm:latest".into(),
            kernel_image: "weaveworks/ignite-kernel:5.10.51".into(),
            sandbox_image: "weaveworks/ignite:v0.10.0".into(),
            vm_startup_script_path: None,
            docker_registry_mirror_urls: Vec::new(),
        }
    }
}

pub struct FirecrackerRunner {
    ctx: RunnerContext,
    name: String,
    device: PathBuf,
    options: FirecrackerOptions,
    resources: ResourceLimits,
    /// Container options as seen from inside the VM.
    vm_docker: DockerOptions,
    auth: DockerAuthConfig,
    temp_dir: Option<PathBuf>,
    /// Set once the name is registered; teardown removes the VM only then.
    registered: bool,
    state: RunnerState,
}

impl FirecrackerRunner {
    pub fn new(
        ctx: RunnerContext,
        name: String,
        device: &Path,
        options: FirecrackerOptions,
        docker: DockerOptions,
        auth: DockerAuthConfig,
    ) -> Self {
        let resources = docker.resources.clone();
        let mut vm_docker = docker;
        vm_docker.resources.docker_host_mount_path = None;
        vm_docker.config_path = (!auth.is_empty()).then(|| PathBuf::from(VM_DOCKER_CONFIG_DIR));

        Self {
            ctx,
            name,
            device: device.to_path_buf(),
            options,
            resources,
            vm_docker,
            auth,
            temp_dir: None,
            registered: false,
            state: RunnerState::Created,
        }
    }

    pub fn vm_name(&self) -> &str {
        &self.name
    }

    /// `ignite run` argv. `copy_files` are `(host path, vm path)` pairs.
    fn start_argv(&self, copy_files: &[(PathBuf, String)]) -> Vec<String> {
        let mut argv: Vec<String> = [
            "ignite",
            "run",
            "--runtime",
            "docker",
            "--network-plugin",
            "cni",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if self.resources.num_cpus > 0 {
            argv.push("--cpus".into());
            argv.push(self.resources.num_cpus.to_string());
        }
        if !self.resources.memory.is_empty() {
            argv.push("--memory".into());
            argv.push(self.resources.memory.clone());
        }
        if !self.resources.disk_space.is_empty() {
            argv.push("--size".into());
            argv.push(self.resources.disk_space.clone());
        }
        for (src, dst) in copy_files {
            argv.push("--copy-files".into());
            argv.push(format!("{}:{}", src.display(), dst));
        }

        argv.push("--volumes".into());
        argv.push(format!("{}:{}", self.device.display(), VM_WORKSPACE_DIR));
        argv.push("--ssh".into());
        argv.push("--name".into());
        argv.push(self.name.clone());
        argv.push("--kernel-image".into());
        argv.push(sanitize_image(&self.options.kernel_image));
        argv.push("--kernel-args".into());
        argv.push(KERNEL_ARGS.into());
        argv.push("--sandbox-image".into());
        argv.push(sanitize_image(&self.options.sandbox_image));
        argv.push(sanitize_image(&self.options.image));
        argv
    }

    /// Stage configs, start the VM under the start lock and run the startup script.
    async fn start(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError> {
        let dir = make_temp_dir("kiln-firecracker-")?;
        self.temp_dir = Some(dir.clone());

        let mut copy_files = Vec::new();
        if !self.options.docker_registry_mirror_urls.is_empty() {
            let path = dir.join("docker-daemon.json");
            let body = serde_json::json!({ "registry-mirrors": self.options.docker_registry_mirror_urls });
            write_json(&path, &body, "docker daemon config").await?;
            copy_files.push((path, VM_DOCKER_DAEMON_CONFIG.to_string()));
        }
        if !self.auth.is_empty() {
            let auth_dir = write_docker_auth(&dir.join("docker_auth"), &self.auth).await?;
            copy_files.push((auth_dir.join("config.json"), format!("{VM_DOCKER_CONFIG_DIR}/config.json")));
        }

        let cni_dir = dir.join("cni");
        tokio::fs::create_dir_all(&cni_dir)
            .await
            .map_err(|e| RunnerError::io("create cni dir", e))?;
        write_json(
            &cni_dir.join(cni::CNI_CONFLIST_NAME),
            &cni::conflist(&self.resources),
            "cni config",
        )
        .await?;

        let start = BuiltCommand::new(
            Operation::SetupFirecrackerStart.as_str(),
            Operation::SetupFirecrackerStart,
            self.start_argv(&copy_files),
        )
        .with_env(StepEnv::single("CNI_CONF_DIR", cni_dir.display().to_string()));

        self.ctx.names.add(self.name.clone());
        self.registered = true;

        let guard = tokio::select! {
            guard = self.ctx.lock.acquire() => guard,
            _ = cancel.cancelled() => {
                return Err(RunnerError::command(Operation::SetupFirecrackerStart.as_str(), ExecError::Cancelled));
            }
        };
        let waited = guard.waited();
        let started = self.ctx.commands.run(cancel, &self.ctx.logger, start).await;
        let held = guard.release();
        self.ctx.metrics.record_vm_start_lock(waited, held);
        debug!(target: "kiln.exec.firecracker", vm = %self.name, ?waited, ?held, "vm start lock released");
        started.map_err(|e| RunnerError::command(Operation::SetupFirecrackerStart.as_str(), e))?;

        if let Some(script) = &self.options.vm_startup_script_path {
            let cmd = BuiltCommand::new(
                Operation::SetupFirecrackerStartupScript.as_str(),
                Operation::SetupFirecrackerStartupScript,
                ["ignite", "exec", self.name.as_str(), "--", script.as_str()],
            );
            self.ctx
                .commands
                .run(cancel, &self.ctx.logger, cmd)
                .await
                .map_err(|e| RunnerError::command(Operation::SetupFirecrackerStartupScript.as_str(), e))?;
        }

        info!(target: "kiln.exec.firecracker", vm = %self.name, "vm started");
        Ok(())
    }
}

async fn write_json(path: &Path, value: &serde_json::Value, context: &str) -> Result<(), RunnerError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| RunnerError::Serialize {
        context: context.into(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| RunnerError::io(format!("write {context}"), e))
}

#[async_trait]
impl Runner for FirecrackerRunner {
    fn name(&self) -> &'static str {
        "firecracker"
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn setup(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError> {
        if self.state != RunnerState::Created {
            return Err(RunnerError::NotReady(self.state));
        }
        let result = self.start(cancel).await;
        self.state = match result {
            Ok(()) => RunnerState::Ready,
            Err(_) => RunnerState::Failed,
        };
        result
    }

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError> {
        self.state.ensure_ready()?;
        let cmd = firecracker_command(&self.name, spec, &self.vm_docker)?;
        self.ctx
            .commands
            .run(cancel, &self.ctx.logger, cmd)
            .await
            .map_err(|e| RunnerError::command(&spec.key, e))
    }

    async fn teardown(&mut self) -> Result<(), RunnerError> {
        if self.state == RunnerState::Closed {
            return Ok(());
        }
        self.state = RunnerState::Closed;

        if self.registered {
            let cancel = CancellationToken::new();
            let cmd = BuiltCommand::new(
                Operation::TeardownFirecrackerRemove.as_str(),
                Operation::TeardownFirecrackerRemove,
                ["ignite", "rm", "-f", self.name.as_str()],
            );
            if let Err(e) = self.ctx.commands.run(&cancel, &self.ctx.logger, cmd).await {
                // The janitor picks up VMs that survive this.
                warn!(target: "kiln.exec.firecracker", vm = %self.name, error = %e, "failed to remove vm");
            }
            self.ctx.names.remove(&self.name);
            self.registered = false;
        }

        if let Some(dir) = self.temp_dir.take() {
            remove_temp_dir(&dir).await?;
        }
        Ok(())
    }
}
