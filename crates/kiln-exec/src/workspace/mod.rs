//! Per-job workspace: a host directory, or an ext4 image attached to a loop device for VMs.

mod clone;
pub use clone::{CloneOptions, clone_commands, clone_repository, fetch_args};

mod scripts;
pub use scripts::{SCRIPT_PREAMBLE, script_body, script_name, write_files};

mod paths;

mod directory;
pub use directory::DirectoryWorkspace;

mod block;
pub use block::{BlockDeviceWorkspace, DEFAULT_DISK_BYTES};

use std::{path::Path, sync::Arc};

use kiln_core::{CmdRunner, CommandRunner};
use kiln_log::ExecutionLogger;
use kiln_model::{Job, ResourceLimits};
use tokio_util::sync::CancellationToken;

use crate::{error::WorkspaceError, util::is_contained};

#[derive(Clone)]
pub struct WorkspaceContext {
    pub logger: Arc<ExecutionLogger>,
    pub commands: Arc<dyn CommandRunner>,
    pub host: Arc<dyn CmdRunner>,
    pub clone: CloneOptions,
}

pub enum Workspace {
    Directory(DirectoryWorkspace),
    BlockDevice(BlockDeviceWorkspace),
}

impl Workspace {
    /// Prepare the workspace for `job`. Anything created is removed again when preparation fails.
    pub async fn prepare(
        ctx: &WorkspaceContext,
        cancel: &CancellationToken,
        job: &Job,
        limits: &ResourceLimits,
        block_device: bool,
    ) -> Result<Self, WorkspaceError> {
        if block_device {
            let size = limits.disk_space_bytes()?.unwrap_or(DEFAULT_DISK_BYTES);
            BlockDeviceWorkspace::prepare(ctx, cancel, job, size)
                .await
                .map(Workspace::BlockDevice)
        } else {
            DirectoryWorkspace::prepare(ctx, cancel, job)
                .await
                .map(Workspace::Directory)
        }
    }

    /// Directory for host-side runners, block device for VMs.
    pub fn path(&self) -> &Path {
        match self {
            Workspace::Directory(w) => w.path(),
            Workspace::BlockDevice(w) => w.device(),
        }
    }

    pub fn script_filenames(&self) -> &[String] {
        match self {
            Workspace::Directory(w) => w.script_filenames(),
            Workspace::BlockDevice(w) => w.script_filenames(),
        }
    }

    /// Delete the workspace, or with `keep` leave it in place and log where it is.
    pub async fn remove(&self, keep: bool) -> Result<(), WorkspaceError> {
        match self {
            Workspace::Directory(w) => w.remove(keep).await,
            Workspace::BlockDevice(w) => w.remove(keep).await,
        }
    }
}

/// Clone the repository (when the job names one) and write files and scripts under `root`.
pub(crate) async fn populate(
    ctx: &WorkspaceContext,
    cancel: &CancellationToken,
    root: &Path,
    job: &Job,
) -> Result<Vec<String>, WorkspaceError> {
    if !job.repository_name.is_empty() {
        if !is_contained(&job.repository_directory) {
            return Err(WorkspaceError::InvalidPath(job.repository_directory.clone()));
        }
        let repo_dir = paths::create_dir_within(root, Path::new(&job.repository_directory)).await?;
        clone_repository(ctx.commands.as_ref(), &ctx.logger, cancel, &repo_dir, job, &ctx.clone).await?;
    }
    write_files(&ctx.logger, root, job).await
}
