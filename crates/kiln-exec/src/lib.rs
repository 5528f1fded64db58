//! Job execution engine: command building, process supervision, runner backends,
//! workspace preparation, VM janitor and per-job orchestration.

pub mod command;
pub mod error;
pub mod janitor;
pub mod job;
pub mod proc;
pub mod runner;
pub mod workspace;

mod util;

#[cfg(test)]
mod testing;

pub use error::{ExecError, JobError, JobFailure, WorkspaceError};
pub use janitor::{Janitor, JanitorConfig};
pub use job::{JobExecutor, runner_specs};
pub use proc::{AllowList, ProcessSupervisor};
pub use runner::{Backend, BackendKind, RunnerContext, RunnerOptions};
pub use workspace::{CloneOptions, Workspace, WorkspaceContext};
