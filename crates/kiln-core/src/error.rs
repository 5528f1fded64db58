use thiserror::Error;

use crate::RunnerState;

/// Failure of a single supervised command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The first argv token is not an allow-listed binary; nothing was spawned.
    #[error("illegal command: {program:?}")]
    IllegalCommand { program: String },
    #[error("spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("wait: {0}")]
    Wait(String),
    #[error("reading {stream}: {reason}")]
    Pipe { stream: &'static str, reason: String },
    #[error("command {key} failed with exit code {code}")]
    NonZeroExit { key: String, code: i32 },
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(String),
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled)
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

/// Failure of a host utility invoked outside the step allow-list (mkfs, losetup, mount, ignite ps).
#[derive(Error, Debug)]
pub enum CmdError {
    #[error("spawn {command}: {reason}")]
    Spawn { command: String, reason: String },
    #[error("{command} failed ({status}): {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
    #[error("{command} cancelled")]
    Cancelled { command: String },
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("runner is not ready (state: {0:?})")]
    NotReady(RunnerState),
    #[error("{stage}: {source}")]
    Command {
        stage: String,
        #[source]
        source: ExecError,
    },
    #[error("{stage}: {source}")]
    Host {
        stage: String,
        #[source]
        source: CmdError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("serialize {context}: {reason}")]
    Serialize { context: String, reason: String },
}

impl RunnerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RunnerError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn command(stage: impl Into<String>, source: ExecError) -> Self {
        RunnerError::Command {
            stage: stage.into(),
            source,
        }
    }

    /// True when the failure was caused by cancellation rather than the step itself.
    pub fn is_cancelled(&self) -> bool {
        match self {
            RunnerError::Command { source, .. } => source.is_cancelled(),
            RunnerError::Host { source, .. } => matches!(source, CmdError::Cancelled { .. }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_visible_through_wrapping() {
        let err = RunnerError::command("step.docker.0", ExecError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "step.docker.0: cancelled");

        let err = RunnerError::command(
            "step.docker.0",
            ExecError::NonZeroExit {
                key: "step.docker.0".into(),
                code: 2,
            },
        );
        assert!(!err.is_cancelled());
    }
}
