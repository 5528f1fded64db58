//! Host utilities the engine calls directly (filesystem and VM inventory tools).
//!
//! These never carry job-controlled arguments, so they bypass the step allow-list and the execution log.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CmdError;

#[async_trait]
pub trait CmdRunner: Send + Sync + 'static {
    /// Run `program args...` to completion and return stdout followed by stderr.
    async fn combined_output(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<String, CmdError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealCmdRunner;

#[async_trait]
impl CmdRunner for RealCmdRunner {
    async fn combined_output(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<String, CmdError> {
        let command = render(program, args);
        trace!(target: "kiln.host", %command, "spawn");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CmdError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let output = tokio::select! {
            out = child.wait_with_output() => out.map_err(|e| CmdError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(CmdError::Cancelled { command }),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(CmdError::Failed {
                command,
                status: output.status.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }
}

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let out = RealCmdRunner
            .combined_output(
                &CancellationToken::new(),
                "sh",
                &["-c", "echo out; echo err >&2"],
            )
            .await
            .unwrap();
        assert_eq!(out, "out\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error_with_output() {
        let err = RealCmdRunner
            .combined_output(&CancellationToken::new(), "sh", &["-c", "echo boom; exit 4"])
            .await
            .unwrap_err();
        match err {
            CmdError::Failed { output, .. } => assert_eq!(output, "boom\n"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = RealCmdRunner
            .combined_output(&cancel, "sh", &["-c", "sleep 5"])
            .await
            .unwrap_err();
        assert!(matches!(err, CmdError::Cancelled { .. }));
    }
}
