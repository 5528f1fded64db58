//! Runs one job end to end: workspace, runner, steps, teardown, log flush.

use std::sync::Arc;

use kiln_core::{
    CmdRunner, CommandRunner, MetricsHandle, NameSet, NoopMetrics, RealCmdRunner, Runner, VmStartLock,
};
use kiln_log::{ExecutionLogStore, ExecutionLogger, LogOptions};
use kiln_model::{Job, StepSpec};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{JobError, JobFailure},
    proc::{AllowList, ProcessSupervisor},
    runner::{Backend, RunnerContext, RunnerOptions},
    workspace::{CloneOptions, Workspace, WorkspaceContext, script_name},
};

/// Placeholder substituted for the clone token in execution logs.
const TOKEN_PLACEHOLDER: &str = "SECRET_REMOVED";

/// Step specs for `job`: container steps first, then internal CLI steps.
///
/// `scripts` are the workspace script names in container-step order.
pub fn runner_specs(job: &Job, scripts: &[String]) -> Vec<StepSpec> {
    let docker = job.docker_steps.iter().enumerate().map(|(i, step)| {
        let script = scripts.get(i).cloned().unwrap_or_else(|| script_name(job, i));
        StepSpec::container(format!("step.docker.{i}"), step.image.clone(), script)
            .with_dir(step.dir.clone())
            .with_env(step.env.clone())
    });
    let cli = job.cli_steps.iter().enumerate().map(|(i, step)| {
        let command = std::iter::once("src".to_string()).chain(step.commands.iter().cloned());
        StepSpec::host(format!("step.src.{i}"), command)
            .with_dir(step.dir.clone())
            .with_env(step.env.clone())
    });
    docker.chain(cli).collect()
}

pub struct JobExecutor {
    options: RunnerOptions,
    clone: CloneOptions,
    store: Arc<dyn ExecutionLogStore>,
    log_options: LogOptions,
    metrics: MetricsHandle,
    lock: VmStartLock,
    names: NameSet,
    host: Arc<dyn CmdRunner>,
    commands: Option<Arc<dyn CommandRunner>>,
}

impl JobExecutor {
    pub fn new(options: RunnerOptions, clone: CloneOptions, store: Arc<dyn ExecutionLogStore>) -> Self {
        Self {
            options,
            clone,
            store,
            log_options: LogOptions::default(),
            metrics: NoopMetrics::handle(),
            lock: VmStartLock::new(),
            names: NameSet::new(),
            host: Arc::new(RealCmdRunner),
            commands: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share the VM start lock between executors of one host.
    pub fn with_lock(mut self, lock: VmStartLock) -> Self {
        self.lock = lock;
        self
    }

    /// Share the running-VM set with the janitor.
    pub fn with_names(mut self, names: NameSet) -> Self {
        self.names = names;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn CmdRunner>) -> Self {
        self.host = host;
        self
    }

    /// Replace the process supervisor.
    pub fn with_commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_log_options(mut self, log_options: LogOptions) -> Self {
        self.log_options = log_options;
        self
    }

    pub fn names(&self) -> &NameSet {
        &self.names
    }

    fn commands(&self) -> Arc<dyn CommandRunner> {
        match &self.commands {
            Some(commands) => Arc::clone(commands),
            None => Arc::new(ProcessSupervisor::new(AllowList::default(), Arc::clone(&self.metrics))),
        }
    }

    /// Execute `job`.
    ///
    /// The first failure is returned as the cause; teardown, workspace removal and log flush
    /// always run, and their errors are attached without masking it. Cleanup errors alone never
    /// fail a job.
    pub async fn execute(&self, cancel: &CancellationToken, job: &Job) -> Result<(), JobError> {
        let mut redactions: Vec<(String, String)> = job
            .redacted_values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(token) = &self.clone.token {
            redactions.push((token.clone(), TOKEN_PLACEHOLDER.to_string()));
        }
        let logger = Arc::new(ExecutionLogger::with_options(
            Arc::clone(&self.store),
            job.id,
            redactions,
            self.log_options.clone(),
        ));
        let commands = self.commands();
        info!(target: "kiln.exec.job", job = job.id, backend = ?self.options.backend, "executing job");

        let workspace_ctx = WorkspaceContext {
            logger: Arc::clone(&logger),
            commands: Arc::clone(&commands),
            host: Arc::clone(&self.host),
            clone: self.clone.clone(),
        };
        let workspace = match Workspace::prepare(
            &workspace_ctx,
            cancel,
            job,
            &self.options.docker.resources,
            self.options.backend.uses_block_device(),
        )
        .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                let mut cleanup = Vec::new();
                flush(&logger, &mut cleanup).await;
                return Err(JobError {
                    cause: e.into(),
                    cleanup,
                });
            }
        };

        let mut cleanup = Vec::new();
        let runner_ctx = RunnerContext {
            logger: Arc::clone(&logger),
            commands,
            host: Arc::clone(&self.host),
            metrics: Arc::clone(&self.metrics),
            lock: self.lock.clone(),
            names: self.names.clone(),
        };
        let result = self.run_steps(cancel, job, &workspace, runner_ctx, &mut cleanup).await;

        remove_workspace(&logger, &workspace, self.options.keep_workspaces, &mut cleanup).await;
        flush(&logger, &mut cleanup).await;

        match result {
            Err(cause) => {
                warn!(target: "kiln.exec.job", job = job.id, error = %cause, "job failed");
                Err(JobError { cause, cleanup })
            }
            Ok(()) => {
                if !cleanup.is_empty() {
                    warn!(target: "kiln.exec.job", job = job.id, errors = ?cleanup, "job succeeded with cleanup errors");
                }
                info!(target: "kiln.exec.job", job = job.id, "job finished");
                Ok(())
            }
        }
    }

    async fn run_steps(
        &self,
        cancel: &CancellationToken,
        job: &Job,
        workspace: &Workspace,
        ctx: RunnerContext,
        cleanup: &mut Vec<String>,
    ) -> Result<(), JobFailure> {
        let mut runner = Backend::new(&self.options, ctx, workspace.path(), &job.docker_auth_config);

        let result = match runner.setup(cancel).await {
            Err(e) => Err(JobFailure::Setup(e)),
            Ok(()) => {
                let mut result = Ok(());
                for spec in runner_specs(job, workspace.script_filenames()) {
                    if let Err(e) = runner.run(cancel, &spec).await {
                        result = Err(JobFailure::Step(e));
                        break;
                    }
                }
                result
            }
        };

        if let Err(e) = runner.teardown().await {
            cleanup.push(format!("teardown {}: {e}", runner.name()));
        }
        result
    }
}

/// Remove the workspace and record the outcome as the `teardown.fs` entry.
async fn remove_workspace(logger: &ExecutionLogger, workspace: &Workspace, keep: bool, cleanup: &mut Vec<String>) {
    let handle = logger.log("teardown.fs", &[]).await;
    match workspace.remove(keep).await {
        Ok(()) => {
            let verb = if keep { "preserved" } else { "removed" };
            handle.write_line("stdout", &format!("{verb} {}", workspace.path().display()));
            handle.finalize(0);
        }
        Err(e) => {
            handle.write_line("stderr", &e.to_string());
            handle.finalize(1);
            cleanup.push(format!("remove workspace: {e}"));
        }
    }
}

async fn flush(logger: &ExecutionLogger, cleanup: &mut Vec<String>) {
    if let Err(e) = logger.flush().await {
        error!(target: "kiln.exec.job", job = logger.job_id(), error = %e, "failed to persist execution logs");
        cleanup.push(format!("flush execution log: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use kiln_model::{CliStep, DockerStep, StepEnv};

    use super::*;
    use crate::{
        runner::BackendKind,
        testing::{MemStore, RecordingCommands, ScriptedHost},
    };

    fn job() -> Job {
        Job {
            id: 9,
            repository_name: "github.com/o/r".into(),
            commit: "abc".into(),
            docker_steps: vec![DockerStep {
                image: "alpine".into(),
                commands: vec!["make".into()],
                dir: "sub".into(),
                env: StepEnv::single("A", "1"),
            }],
            cli_steps: vec![CliStep {
                commands: vec!["batch".into(), "exec".into()],
                ..Default::default()
            }],
            redacted_values: [("hunter2".to_string(), "******".to_string())].into(),
            ..Default::default()
        }
    }

    fn executor(
        backend: BackendKind,
        store: Arc<MemStore>,
        commands: Arc<RecordingCommands>,
        host: Arc<ScriptedHost>,
    ) -> JobExecutor {
        let options = RunnerOptions {
            backend,
            ..Default::default()
        };
        let clone = CloneOptions {
            endpoint: "http://proxy/git".into(),
            token: Some("tok-123".into()),
        };
        JobExecutor::new(options, clone, store)
            .with_commands(commands)
            .with_host(host)
    }

    #[test]
    fn specs_follow_step_order() {
        let specs = runner_specs(&job(), &["s0.sh".to_string()]);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].key, "step.docker.0");
        assert_eq!(specs[0].container_image(), Some("alpine"));
        assert_eq!(specs[0].script_path.as_deref(), Some("s0.sh"));
        assert_eq!(specs[0].dir, "sub");
        assert_eq!(specs[1].key, "step.src.0");
        assert_eq!(specs[1].command, vec!["src", "batch", "exec"]);
        assert!(specs[1].container_image().is_none());
    }

    #[tokio::test]
    async fn successful_job_on_host() {
        let store = Arc::new(MemStore::default());
        let commands = Arc::new(RecordingCommands::default());
        let exec = executor(BackendKind::Host, store.clone(), commands.clone(), Arc::new(ScriptedHost::default()));

        exec.execute(&CancellationToken::new(), &job()).await.unwrap();

        let keys: Vec<String> = store.snapshot().into_iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![
                "setup.git.init",
                "setup.git.add-remote",
                "setup.git.disable-gc",
                "setup.git.fetch",
                "setup.git.checkout",
                "setup.git.set-remote",
                "setup.fs.extras",
                "step.docker.0",
                "step.src.0",
                "teardown.fs",
            ]
        );

        let src = commands.calls.lock().unwrap().last().unwrap().clone();
        let workspace: PathBuf = src.dir.unwrap();
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn clone_token_never_reaches_the_store() {
        let store = Arc::new(MemStore::default());
        let exec = executor(
            BackendKind::Host,
            store.clone(),
            Arc::new(RecordingCommands::default()),
            Arc::new(ScriptedHost::default()),
        );
        exec.execute(&CancellationToken::new(), &job()).await.unwrap();

        let fetch = store
            .snapshot()
            .into_iter()
            .find(|e| e.key == "setup.git.fetch")
            .unwrap();
        let joined = fetch.command.join(" ");
        assert!(!joined.contains("tok-123"));
        assert!(joined.contains("token-executor SECRET_REMOVED"));
    }

    #[tokio::test]
    async fn first_step_failure_stops_the_job_but_cleans_up() {
        let store = Arc::new(MemStore::default());
        let commands = Arc::new(RecordingCommands::failing("step.docker.0"));
        let exec = executor(BackendKind::Docker, store.clone(), commands.clone(), Arc::new(ScriptedHost::default()));

        let err = exec.execute(&CancellationToken::new(), &job()).await.unwrap_err();
        assert!(matches!(err.cause, JobFailure::Step(_)));
        assert!(err.cleanup.is_empty());
        assert!(!err.is_cancelled());

        let keys = commands.keys();
        assert!(!keys.iter().any(|k| k == "step.src.0"));
        let entries = store.snapshot();
        assert_eq!(entries.last().unwrap().key, "teardown.fs");
        assert_eq!(entries.last().unwrap().exit_code, Some(0));

        let docker = commands.calls.lock().unwrap().last().unwrap().clone();
        assert!(!docker.dir.unwrap().exists());
    }

    #[tokio::test]
    async fn workspace_failure_runs_no_steps() {
        let store = Arc::new(MemStore::default());
        let commands = Arc::new(RecordingCommands::failing("setup.git.fetch"));
        let exec = executor(BackendKind::Host, store.clone(), commands.clone(), Arc::new(ScriptedHost::default()));

        let err = exec.execute(&CancellationToken::new(), &job()).await.unwrap_err();
        assert!(matches!(err.cause, JobFailure::Workspace(_)));
        assert!(err.to_string().contains("failed setup.git.fetch"));
        assert!(!commands.keys().iter().any(|k| k.starts_with("step.")));
    }

    #[tokio::test]
    async fn firecracker_job_releases_vm_and_device() {
        let store = Arc::new(MemStore::default());
        let commands = Arc::new(RecordingCommands::default());
        let host = Arc::new(ScriptedHost::default());
        host.reply("losetup", Ok("/dev/loop5\n"));
        let mut exec = executor(BackendKind::Firecracker, store.clone(), commands.clone(), host.clone());
        exec.options.docker.resources.disk_space = "1M".into();

        exec.execute(&CancellationToken::new(), &job()).await.unwrap();

        let keys = commands.keys();
        let start = keys.iter().position(|k| k == "setup.firecracker.start").unwrap();
        let step = keys.iter().position(|k| k == "step.docker.0").unwrap();
        let remove = keys.iter().position(|k| k == "teardown.firecracker.remove").unwrap();
        assert!(start < step && step < remove);
        assert!(exec.names().is_empty());

        let steps = commands.argvs();
        assert_eq!(steps[step][0], "ignite");
        assert_eq!(host.calls().last().unwrap(), &vec!["losetup", "--detach", "/dev/loop5"]);
    }

    fn firecracker_cancelled_at(prefix: &str) -> (JobExecutor, CancellationToken, Arc<RecordingCommands>, Arc<ScriptedHost>) {
        let cancel = CancellationToken::new();
        let commands = Arc::new(RecordingCommands::cancelling(prefix, cancel.clone()));
        let host = Arc::new(ScriptedHost::default());
        host.reply("losetup", Ok("/dev/loop7\n"));
        let mut exec = executor(
            BackendKind::Firecracker,
            Arc::new(MemStore::default()),
            commands.clone(),
            host.clone(),
        );
        exec.options.docker.resources.disk_space = "1M".into();
        (exec, cancel, commands, host)
    }

    #[tokio::test]
    async fn cancelled_step_still_tears_down_in_a_fresh_scope() {
        let (exec, cancel, commands, host) = firecracker_cancelled_at("step.docker.0");

        let err = exec.execute(&cancel, &job()).await.unwrap_err();
        assert!(err.is_cancelled(), "{err}");
        assert!(matches!(err.cause, JobFailure::Step(_)));
        assert!(err.cleanup.is_empty(), "{err}");

        let keys = commands.keys();
        assert!(!keys.iter().any(|k| k == "step.src.0"));
        assert!(commands.live_keys().iter().any(|k| k == "teardown.firecracker.remove"));
        assert!(exec.names().is_empty());
        assert_eq!(host.calls().last().unwrap(), &vec!["losetup", "--detach", "/dev/loop7"]);
    }

    #[tokio::test]
    async fn cancellation_during_vm_start_releases_everything() {
        let (exec, cancel, commands, host) = firecracker_cancelled_at("setup.firecracker.start");

        let err = exec.execute(&cancel, &job()).await.unwrap_err();
        assert!(err.is_cancelled(), "{err}");
        assert!(matches!(err.cause, JobFailure::Setup(_)));

        assert!(!commands.keys().iter().any(|k| k.starts_with("step.")));
        assert!(commands.live_keys().iter().any(|k| k == "teardown.firecracker.remove"));
        assert!(exec.names().is_empty());
        assert_eq!(host.calls().last().unwrap(), &vec!["losetup", "--detach", "/dev/loop7"]);
    }
}
