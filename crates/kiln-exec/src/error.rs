use std::fmt;

use kiln_core::{CmdError, RunnerError};
use kiln_log::LogError;
use kiln_model::ModelError;
use thiserror::Error;

pub use kiln_core::ExecError;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// A clone sub-step failed; `step` is its log key.
    #[error("failed {step}: {source}")]
    Clone {
        step: String,
        #[source]
        source: ExecError,
    },
    #[error("{stage}: {source}")]
    Host {
        stage: &'static str,
        #[source]
        source: CmdError,
    },
    #[error("invalid workspace file path {0:?}")]
    InvalidPath(String),
    #[error(transparent)]
    Size(#[from] ModelError),
    /// Preparation failed and undoing it failed too.
    #[error("{cause} (cleanup: {})", .cleanup.join("; "))]
    Unwind {
        cause: Box<WorkspaceError>,
        cleanup: Vec<String>,
    },
}

impl WorkspaceError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkspaceError::Clone { source, .. } => source.is_cancelled(),
            WorkspaceError::Host { source, .. } => matches!(source, CmdError::Cancelled { .. }),
            WorkspaceError::Unwind { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }

    /// Attach cleanup failures; returns `self` unchanged when there are none.
    pub fn with_cleanup(self, cleanup: Vec<String>) -> Self {
        if cleanup.is_empty() {
            self
        } else {
            WorkspaceError::Unwind {
                cause: Box::new(self),
                cleanup,
            }
        }
    }
}

/// What made a job fail.
#[derive(Error, Debug)]
pub enum JobFailure {
    #[error("prepare workspace: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("setup runner: {0}")]
    Setup(#[source] RunnerError),
    #[error("{0}")]
    Step(#[source] RunnerError),
    #[error("{0}")]
    Log(#[from] LogError),
}

/// Job failure plus every cleanup error that followed it.
#[derive(Error, Debug)]
#[error("{cause}{}", Cleanup(.cleanup))]
pub struct JobError {
    #[source]
    pub cause: JobFailure,
    pub cleanup: Vec<String>,
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        match &self.cause {
            JobFailure::Workspace(e) => e.is_cancelled(),
            JobFailure::Setup(e) | JobFailure::Step(e) => e.is_cancelled(),
            JobFailure::Log(_) => false,
        }
    }
}

struct Cleanup<'a>(&'a [String]);

impl fmt::Display for Cleanup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, " (cleanup: {})", self.0.join("; "))
    }
}
