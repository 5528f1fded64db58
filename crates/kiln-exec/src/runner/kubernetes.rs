//! Orchestrated runner: each container step becomes a cluster job driven through `kubectl`.
//!
//! Provisional backend, compiled only with the `kubernetes` feature.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use kiln_core::{ExecError, Outcome, Runner, RunnerError, RunnerState};
use kiln_model::{CONTAINER_DATA_DIR, Operation, ResourceLimits, SCRIPTS_PATH, StepSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RunnerContext, make_temp_dir, remove_temp_dir};
use crate::{
    command::{checked_dir, script_of},
    util::container_path,
};

const KUBECTL: &str = "kubectl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesOptions {
    pub namespace: String,
    /// Claim holding workspaces; mounted with the workspace directory name as sub-path.
    /// Without it the workspace is mounted from the node's filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_volume_claim: Option<String>,
    pub poll_interval_ms: u64,
    pub node_selector: BTreeMap<String, String>,
}

impl Default for KubernetesOptions {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            persistence_volume_claim: None,
            poll_interval_ms: 1000,
            node_selector: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

pub struct KubernetesRunner {
    ctx: RunnerContext,
    workspace: PathBuf,
    options: KubernetesOptions,
    resources: ResourceLimits,
    temp_dir: Option<PathBuf>,
    state: RunnerState,
}

impl KubernetesRunner {
    pub fn new(ctx: RunnerContext, workspace: &Path, options: KubernetesOptions, resources: ResourceLimits) -> Self {
        Self {
            ctx,
            workspace: workspace.to_path_buf(),
            options,
            resources,
            temp_dir: None,
            state: RunnerState::Created,
        }
    }

    async fn kubectl(&self, cancel: &CancellationToken, op: Operation, args: &[&str]) -> Result<String, RunnerError> {
        let result = self.ctx.host.combined_output(cancel, KUBECTL, args).await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(kiln_core::CmdError::Cancelled { .. }) => Outcome::Cancelled,
            Err(_) => Outcome::Failure,
        };
        self.ctx.metrics.record_operation(op, outcome);
        result.map_err(|source| RunnerError::Host {
            stage: op.as_str().to_string(),
            source,
        })
    }

    /// Poll until the job finishes.
    async fn wait(&self, cancel: &CancellationToken, name: &str) -> Result<JobStatus, RunnerError> {
        let ns = self.options.namespace.as_str();
        let interval = Duration::from_millis(self.options.poll_interval_ms.max(10));
        loop {
            let out = self
                .kubectl(
                    cancel,
                    Operation::KubernetesWaitJob,
                    &["get", "job", name, "-n", ns, "-o", "jsonpath={.status.succeeded},{.status.failed}"],
                )
                .await?;
            match parse_job_status(&out) {
                JobStatus::Running => {}
                done => return Ok(done),
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RunnerError::command(Operation::KubernetesWaitJob.as_str(), ExecError::Cancelled));
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn exit_code(&self, cancel: &CancellationToken, name: &str) -> i32 {
        let selector = format!("job-name={name}");
        let out = self
            .kubectl(
                cancel,
                Operation::KubernetesWaitJob,
                &[
                    "get",
                    "pods",
                    "-n",
                    self.options.namespace.as_str(),
                    "-l",
                    selector.as_str(),
                    "-o",
                    "jsonpath={.items[0].status.containerStatuses[0].state.terminated.exitCode}",
                ],
            )
            .await;
        out.ok().and_then(|s| s.trim().parse().ok()).unwrap_or(1)
    }

    async fn run_job(&self, cancel: &CancellationToken, spec: &StepSpec, name: &str) -> Result<(), RunnerError> {
        let image = spec
            .container_image()
            .ok_or_else(|| RunnerError::InvalidSpec(format!("{}: only container steps run on kubernetes", spec.key)))?;
        let script = script_of(spec)?;
        checked_dir(spec)?;
        let manifest = job_manifest(name, image, script, spec, &self.workspace, &self.options, &self.resources);

        let dir = self
            .temp_dir
            .as_deref()
            .ok_or(RunnerError::NotReady(self.state))?;
        let path = dir.join(format!("{name}.json"));
        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| RunnerError::Serialize {
            context: "job manifest".into(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| RunnerError::io("write job manifest", e))?;

        let path = path.display().to_string();
        self.kubectl(
            cancel,
            Operation::KubernetesCreateJob,
            &["create", "-n", self.options.namespace.as_str(), "-f", path.as_str()],
        )
        .await?;

        let command = vec![
            "/bin/sh".to_string(),
            container_path(&[CONTAINER_DATA_DIR, SCRIPTS_PATH, script]),
        ];
        let handle = self.ctx.logger.log(spec.key.clone(), &command).await;

        let status = self.wait(cancel, name).await?;
        let target = format!("job/{name}");
        match self
            .kubectl(cancel, Operation::KubernetesReadLogs, &["logs", "-n", self.options.namespace.as_str(), target.as_str()])
            .await
        {
            Ok(logs) => {
                for line in logs.lines() {
                    handle.write_line("stdout", line);
                }
            }
            Err(e) => handle.write_line("stderr", &e.to_string()),
        }

        let code = match status {
            JobStatus::Succeeded => 0,
            _ => self.exit_code(cancel, name).await,
        };
        handle.finalize(code);
        debug!(target: "kiln.exec.kubernetes", job = %name, code, "job finished");

        if code == 0 {
            Ok(())
        } else {
            Err(RunnerError::command(
                &spec.key,
                ExecError::NonZeroExit {
                    key: spec.key.clone(),
                    code,
                },
            ))
        }
    }
}

#[async_trait]
impl Runner for KubernetesRunner {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn setup(&mut self, _cancel: &CancellationToken) -> Result<(), RunnerError> {
        if self.state != RunnerState::Created {
            return Err(RunnerError::NotReady(self.state));
        }
        match make_temp_dir("kiln-kubernetes-") {
            Ok(dir) => {
                self.temp_dir = Some(dir);
                self.state = RunnerState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = RunnerState::Failed;
                Err(e)
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken, spec: &StepSpec) -> Result<(), RunnerError> {
        self.state.ensure_ready()?;
        let name = job_name(&spec.key);
        let result = self.run_job(cancel, spec, &name).await;

        // Deletion runs in its own scope so a cancelled step never leaks the job.
        let cleanup = CancellationToken::new();
        if let Err(e) = self
            .kubectl(
                &cleanup,
                Operation::KubernetesDeleteJob,
                &["delete", "job", name.as_str(), "-n", self.options.namespace.as_str(), "--ignore-not-found", "--cascade=background"],
            )
            .await
        {
            warn!(target: "kiln.exec.kubernetes", job = %name, error = %e, "failed to delete job");
        }
        result
    }

    async fn teardown(&mut self) -> Result<(), RunnerError> {
        self.state = RunnerState::Closed;
        if let Some(dir) = self.temp_dir.take() {
            remove_temp_dir(&dir).await?;
        }
        Ok(())
    }
}

/// DNS-1123 job name derived from the step key plus a random suffix.
fn job_name(key: &str) -> String {
    let mut slug: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug.truncate(40);
    let slug = slug.trim_matches('-');
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("kiln-{slug}-{}", &suffix[..8])
}

/// `{.status.succeeded},{.status.failed}`, either side possibly empty.
fn parse_job_status(out: &str) -> JobStatus {
    let (succeeded, failed) = out.trim().split_once(',').unwrap_or((out.trim(), ""));
    let positive = |s: &str| s.trim().parse::<u32>().is_ok_and(|n| n > 0);
    if positive(succeeded) {
        JobStatus::Succeeded
    } else if positive(failed) {
        JobStatus::Failed
    } else {
        JobStatus::Running
    }
}

fn job_manifest(
    name: &str,
    image: &str,
    script: &str,
    spec: &StepSpec,
    workspace: &Path,
    options: &KubernetesOptions,
    resources: &ResourceLimits,
) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|kv| json!({ "name": kv.key(), "value": kv.value() }))
        .collect();

    let mut mount = json!({ "name": "workspace", "mountPath": CONTAINER_DATA_DIR });
    let volume = match &options.persistence_volume_claim {
        Some(claim) => {
            if let Some(base) = workspace.file_name() {
                mount["subPath"] = json!(base.to_string_lossy());
            }
            json!({ "name": "workspace", "persistentVolumeClaim": { "claimName": claim } })
        }
        None => json!({
            "name": "workspace",
            "hostPath": { "path": workspace.display().to_string(), "type": "Directory" },
        }),
    };

    let mut limits = serde_json::Map::new();
    if resources.num_cpus > 0 {
        limits.insert("cpu".into(), json!(resources.num_cpus.to_string()));
    }
    if !resources.memory.is_empty() {
        limits.insert("memory".into(), json!(resources.memory));
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "labels": { "app.kubernetes.io/managed-by": "kiln" },
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "nodeSelector": options.node_selector,
                    "containers": [{
                        "name": "step",
                        "image": image,
                        "command": ["/bin/sh", container_path(&[CONTAINER_DATA_DIR, SCRIPTS_PATH, script])],
                        "workingDir": container_path(&[CONTAINER_DATA_DIR, &spec.dir]),
                        "env": env,
                        "volumeMounts": [mount],
                        "resources": { "limits": limits },
                    }],
                    "volumes": [volume],
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kiln_core::NoopMetrics;
    use kiln_model::StepEnv;

    use super::*;
    use crate::testing::{RecordingCommands, ScriptedHost, logger};

    #[test]
    fn status_parsing() {
        assert_eq!(parse_job_status(","), JobStatus::Running);
        assert_eq!(parse_job_status(""), JobStatus::Running);
        assert_eq!(parse_job_status("1,"), JobStatus::Succeeded);
        assert_eq!(parse_job_status(",1"), JobStatus::Failed);
        assert_eq!(parse_job_status("0,0"), JobStatus::Running);
    }

    #[test]
    fn job_names_are_dns_safe() {
        let name = job_name("step.docker.0");
        assert!(name.starts_with("kiln-step-docker-0-"));
        assert!(name.len() <= 63);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn manifest_mounts_claim_with_sub_path() {
        let spec = StepSpec::container("step.docker.0", "alpine", "s.sh")
            .with_dir("sub")
            .with_env(StepEnv::single("A", "1"));
        let options = KubernetesOptions {
            persistence_volume_claim: Some("workspaces".into()),
            ..Default::default()
        };
        let m = job_manifest(
            "kiln-x",
            "alpine",
            "s.sh",
            &spec,
            Path::new("/tmp/kiln-workspace-1"),
            &options,
            &ResourceLimits::default(),
        );
        let container = &m["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["command"][1], "/data/.kiln-executor/s.sh");
        assert_eq!(container["workingDir"], "/data/sub");
        assert_eq!(container["volumeMounts"][0]["subPath"], "kiln-workspace-1");
        assert_eq!(container["env"][0]["name"], "A");
        assert_eq!(
            m["spec"]["template"]["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "workspaces"
        );
    }

    #[tokio::test]
    async fn failed_job_reports_exit_code_and_is_deleted() {
        let (store, logger) = logger();
        let host = Arc::new(ScriptedHost::default());
        host.reply(KUBECTL, Ok("job.batch/created"));
        host.reply(KUBECTL, Ok(",1"));
        host.reply(KUBECTL, Ok("building\nboom"));
        host.reply(KUBECTL, Ok("7"));
        let ctx = RunnerContext {
            logger: logger.clone(),
            commands: Arc::new(RecordingCommands::default()),
            host: host.clone(),
            metrics: NoopMetrics::handle(),
            lock: kiln_core::VmStartLock::noop(),
            names: kiln_core::NameSet::new(),
        };
        let tmp = tempfile::tempdir().unwrap();
        let mut runner = KubernetesRunner::new(ctx, tmp.path(), KubernetesOptions::default(), ResourceLimits::default());
        let cancel = CancellationToken::new();
        runner.setup(&cancel).await.unwrap();

        let err = runner
            .run(&cancel, &StepSpec::container("step.docker.0", "alpine", "s.sh"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code 7"));

        let calls = host.calls();
        assert_eq!(calls[0][1], "create");
        assert_eq!(calls.last().unwrap()[1], "delete");
        runner.teardown().await.unwrap();

        logger.flush().await.unwrap();
        let entries = store.snapshot();
        assert_eq!(entries[0].key, "step.docker.0");
        assert_eq!(entries[0].out, "stdout: building\nstdout: boom\n");
        assert_eq!(entries[0].exit_code, Some(7));
    }

    #[tokio::test]
    async fn host_steps_are_rejected() {
        let (_, logger) = logger();
        let ctx = RunnerContext {
            logger,
            commands: Arc::new(RecordingCommands::default()),
            host: Arc::new(ScriptedHost::default()),
            metrics: NoopMetrics::handle(),
            lock: kiln_core::VmStartLock::noop(),
            names: kiln_core::NameSet::new(),
        };
        let mut runner = KubernetesRunner::new(ctx, Path::new("/ws"), KubernetesOptions::default(), ResourceLimits::default());
        let cancel = CancellationToken::new();
        runner.setup(&cancel).await.unwrap();
        let err = runner.run(&cancel, &StepSpec::host("step.src.0", ["src"])).await.unwrap_err();
        assert!(matches!(err, RunnerError::InvalidSpec(_)));
        runner.teardown().await.unwrap();
    }
}
