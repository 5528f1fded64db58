use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use kiln_core::CmdRunner;
use kiln_model::Job;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{WorkspaceContext, populate};
use crate::error::WorkspaceError;

/// Size of the image when the job sets no disk limit (20 GiB).
pub const DEFAULT_DISK_BYTES: u64 = 20 << 30;

/// Sparse ext4 image attached to a loop device; the VM mounts the device at `/work`.
pub struct BlockDeviceWorkspace {
    host: Arc<dyn CmdRunner>,
    image: PathBuf,
    device: PathBuf,
    scripts: Vec<String>,
}

impl BlockDeviceWorkspace {
    pub async fn prepare(
        ctx: &WorkspaceContext,
        cancel: &CancellationToken,
        job: &Job,
        size: u64,
    ) -> Result<Self, WorkspaceError> {
        let (file, image) = tempfile::Builder::new()
            .prefix("kiln-workspace-")
            .suffix(".ext4")
            .tempfile()
            .map_err(|e| WorkspaceError::io("create workspace image", e))?
            .keep()
            .map_err(|e| WorkspaceError::io("keep workspace image", e.error))?;

        let mut device = None;
        let result = match tokio::fs::File::from_std(file).set_len(size).await {
            Ok(()) => build(ctx, cancel, job, &image, &mut device).await,
            Err(e) => Err(WorkspaceError::io("size workspace image", e)),
        };

        match result {
            Ok((device, scripts)) => {
                info!(
                    target: "kiln.exec.workspace",
                    job = job.id,
                    image = %image.display(),
                    device = %device.display(),
                    "workspace device ready"
                );
                Ok(Self {
                    host: Arc::clone(&ctx.host),
                    image,
                    device,
                    scripts,
                })
            }
            Err(e) => {
                let cleanup = release(ctx.host.as_ref(), device.as_deref(), &image).await;
                Err(e.with_cleanup(cleanup))
            }
        }
    }

    /// Loop device path, e.g. `/dev/loop3`.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Backing image file.
    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn script_filenames(&self) -> &[String] {
        &self.scripts
    }

    /// With `keep`, re-mount the device so its contents can be inspected; otherwise detach and delete.
    pub async fn remove(&self, keep: bool) -> Result<(), WorkspaceError> {
        if keep {
            let mount = tempfile::Builder::new()
                .prefix("kiln-workspace-mount-")
                .tempdir()
                .map(|d| d.keep())
                .map_err(|e| WorkspaceError::io("create mount dir", e))?;
            let device = self.device.display().to_string();
            let target = mount.display().to_string();
            self.host
                .combined_output(&CancellationToken::new(), "mount", &[device.as_str(), target.as_str()])
                .await
                .map_err(|source| WorkspaceError::Host { stage: "mount", source })?;
            info!(
                target: "kiln.exec.workspace",
                mount = %mount.display(),
                device = %self.device.display(),
                image = %self.image.display(),
                "preserving workspace"
            );
            return Ok(());
        }

        let mut errors = release(self.host.as_ref(), Some(&self.device), &self.image).await;
        if errors.is_empty() {
            return Ok(());
        }
        warn!(target: "kiln.exec.workspace", errors = ?errors, "failed to release workspace device");
        let first = errors.remove(0);
        Err(WorkspaceError::Io {
            context: "release workspace".into(),
            source: io::Error::other(first),
        }
        .with_cleanup(errors))
    }
}

/// Format the image, attach and mount it, populate it and unmount again.
///
/// `device` is set as soon as the loop device exists so the caller can detach it on failure.
async fn build(
    ctx: &WorkspaceContext,
    cancel: &CancellationToken,
    job: &Job,
    image: &Path,
    device: &mut Option<PathBuf>,
) -> Result<(PathBuf, Vec<String>), WorkspaceError> {
    let host = ctx.host.as_ref();
    let image_arg = image.display().to_string();

    host.combined_output(cancel, "mkfs.ext4", &[image_arg.as_str()])
        .await
        .map_err(|source| WorkspaceError::Host { stage: "mkfs.ext4", source })?;

    let out = host
        .combined_output(cancel, "losetup", &["--find", "--show", image_arg.as_str()])
        .await
        .map_err(|source| WorkspaceError::Host { stage: "losetup", source })?;
    let dev = PathBuf::from(out.trim());
    *device = Some(dev.clone());

    let mount = tempfile::Builder::new()
        .prefix("kiln-workspace-mount-")
        .tempdir()
        .map(|d| d.keep())
        .map_err(|e| WorkspaceError::io("create mount dir", e))?;
    let dev_arg = dev.display().to_string();
    let mount_arg = mount.display().to_string();

    if let Err(source) = host
        .combined_output(cancel, "mount", &[dev_arg.as_str(), mount_arg.as_str()])
        .await
    {
        let cleanup = remove_mount_dir(&mount).await;
        return Err(WorkspaceError::Host { stage: "mount", source }.with_cleanup(cleanup));
    }

    let populated = populate(ctx, cancel, &mount, job).await;

    // Unmount even when the job is cancelled; a mounted device cannot be detached.
    let unmounted = host
        .combined_output(&CancellationToken::new(), "umount", &[mount_arg.as_str()])
        .await;
    match (populated, unmounted) {
        (Ok(scripts), Ok(_)) => {
            for e in remove_mount_dir(&mount).await {
                warn!(target: "kiln.exec.workspace", error = %e, "failed to remove mount dir");
            }
            Ok((dev, scripts))
        }
        (Ok(_), Err(source)) => Err(WorkspaceError::Host { stage: "umount", source }),
        (Err(e), Ok(_)) => {
            let cleanup = remove_mount_dir(&mount).await;
            Err(e.with_cleanup(cleanup))
        }
        (Err(e), Err(source)) => Err(e.with_cleanup(vec![format!("umount: {source}")])),
    }
}

/// Remove the (unmounted) mount point. Returns the error, if any, for the unwind report.
async fn remove_mount_dir(mount: &Path) -> Vec<String> {
    match tokio::fs::remove_dir(mount).await {
        Ok(()) => Vec::new(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => vec![format!("remove mount dir {}: {e}", mount.display())],
    }
}

/// Detach the loop device and delete the image. Returns every error encountered.
async fn release(host: &dyn CmdRunner, device: Option<&Path>, image: &Path) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(device) = device {
        let dev = device.display().to_string();
        if let Err(e) = host
            .combined_output(&CancellationToken::new(), "losetup", &["--detach", dev.as_str()])
            .await
        {
            errors.push(format!("losetup --detach: {e}"));
        }
    }
    match tokio::fs::remove_file(image).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => errors.push(format!("remove {}: {e}", image.display())),
    }
    errors
}
