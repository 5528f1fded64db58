use std::{
    io,
    path::{Path, PathBuf},
};

use kiln_model::Job;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{WorkspaceContext, populate};
use crate::error::WorkspaceError;

/// Temp directory on the host, mounted into containers at `/data`.
#[derive(Debug)]
pub struct DirectoryWorkspace {
    dir: PathBuf,
    scripts: Vec<String>,
}

impl DirectoryWorkspace {
    pub async fn prepare(ctx: &WorkspaceContext, cancel: &CancellationToken, job: &Job) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix("kiln-workspace-")
            .tempdir()
            .map(|d| d.keep())
            .map_err(|e| WorkspaceError::io("create workspace dir", e))?;

        match populate(ctx, cancel, &dir, job).await {
            Ok(scripts) => {
                info!(target: "kiln.exec.workspace", job = job.id, dir = %dir.display(), "workspace ready");
                Ok(Self { dir, scripts })
            }
            Err(e) => {
                let cleanup = match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => Vec::new(),
                    Err(re) => vec![format!("remove {}: {re}", dir.display())],
                };
                Err(e.with_cleanup(cleanup))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn script_filenames(&self) -> &[String] {
        &self.scripts
    }

    pub async fn remove(&self, keep: bool) -> Result<(), WorkspaceError> {
        if keep {
            info!(target: "kiln.exec.workspace", dir = %self.dir.display(), "preserving workspace");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(target: "kiln.exec.workspace", dir = %self.dir.display(), error = %e, "failed to remove workspace");
                Err(WorkspaceError::io(format!("remove {}", self.dir.display()), e))
            }
        }
    }
}
