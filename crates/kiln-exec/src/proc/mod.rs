//! Process supervisor: the only place step commands are spawned.

mod allow;
pub use allow::AllowList;

mod pipe;

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use kiln_core::{CommandRunner, ExecError, MetricsHandle, NoopMetrics, Outcome};
use kiln_log::{ExecutionHandle, ExecutionLogger};
use kiln_model::BuiltCommand;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::util::kill_graceful;

/// Host variables a child may inherit. Everything else is cleared.
pub const INHERITED_ENV: &[&str] = &["PATH", "HOME", "USER", "TMPDIR", "DOCKER_HOST"];

/// Exit code recorded when the child was terminated by a signal.
const SIGNALED_EXIT_CODE: i32 = -1;

/// Spawns allow-listed commands, streams their output into the execution log and maps the exit.
#[derive(Clone)]
pub struct ProcessSupervisor {
    allow: AllowList,
    metrics: MetricsHandle,
    grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(allow: AllowList, metrics: MetricsHandle) -> Self {
        Self {
            allow,
            metrics,
            grace: Duration::from_secs(5),
        }
    }

    /// Time a cancelled child gets between SIGTERM and SIGKILL.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Spawn and wait. `Ok(code)` means the process ran to an exit; signal deaths map to -1.
    async fn start_and_wait(
        &self,
        cancel: &CancellationToken,
        cmd: &BuiltCommand,
        handle: &ExecutionHandle,
    ) -> Result<i32, ExecError> {
        let program = cmd.program().unwrap_or_default();
        trace!(target: "kiln.exec.proc", key = %cmd.key, argv = ?cmd.argv, "spawn");

        let mut command = Command::new(program);
        command
            .args(&cmd.argv[1..])
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in INHERITED_ENV {
            if let Ok(value) = std::env::var(name) {
                command.env(name, value);
            }
        }
        for kv in cmd.env.iter() {
            command.env(kv.key(), kv.value());
        }
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out, err) = tokio::join!(
            pipe::drain(stdout, "stdout", handle, cancel),
            pipe::drain(stderr, "stderr", handle, cancel),
        );

        let pipe_failed = out.is_err() || err.is_err();
        if cancel.is_cancelled() || pipe_failed {
            debug!(target: "kiln.exec.proc", key = %cmd.key, "stopping child");
            if let Err(e) = kill_graceful(&mut child, self.grace).await {
                warn!(target: "kiln.exec.proc", key = %cmd.key, error = %e, "kill failed");
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::Wait(e.to_string()))?;
        out?;
        err?;

        Ok(status.code().unwrap_or(SIGNALED_EXIT_CODE))
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(AllowList::default(), NoopMetrics::handle())
    }
}

#[async_trait]
impl CommandRunner for ProcessSupervisor {
    async fn run(
        &self,
        cancel: &CancellationToken,
        logger: &ExecutionLogger,
        cmd: BuiltCommand,
    ) -> Result<(), ExecError> {
        if let Err(e) = self.allow.check(&cmd.argv) {
            warn!(target: "kiln.exec.proc", key = %cmd.key, error = %e, "rejected");
            self.metrics.record_operation(cmd.operation, Outcome::Failure);
            return Err(e);
        }

        let handle = logger.log(cmd.key.clone(), &cmd.argv).await;
        let result = match self.start_and_wait(cancel, &cmd, &handle).await {
            Ok(code) => {
                handle.finalize(code);
                match code {
                    0 => Ok(()),
                    _ if cancel.is_cancelled() => Err(ExecError::Cancelled),
                    code => Err(ExecError::NonZeroExit {
                        key: cmd.key.clone(),
                        code,
                    }),
                }
            }
            Err(e) => {
                handle.write_line("stderr", &e.to_string());
                Err(e)
            }
        };
        drop(handle);

        let outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(e) if e.is_cancelled() => Outcome::Cancelled,
            Err(_) => Outcome::Failure,
        };
        self.metrics.record_operation(cmd.operation, outcome);
        debug!(target: "kiln.exec.proc", key = %cmd.key, outcome = outcome.as_str(), "finished");

        result
    }
}
