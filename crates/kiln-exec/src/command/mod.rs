//! Pure translation of step specs into concrete argv.
//!
//! Nothing here touches the filesystem or spawns processes.

mod quote;
pub use quote::{is_env_name, shell_join, shell_quote};

mod host;
pub use host::host_command;

mod docker;
pub use docker::{DockerOptions, docker_command};

mod firecracker;
pub use firecracker::{firecracker_command, sanitize_image, wrap_in_dir, vm_exec_argv};

use std::path::Path;

use kiln_core::RunnerError;
use kiln_model::{BuiltCommand, StepSpec};

use crate::util::is_contained;

/// Build the invocation for `spec` on the host, choosing container or direct mode from its image.
pub fn step_command(
    workspace: &Path,
    spec: &StepSpec,
    options: &DockerOptions,
) -> Result<BuiltCommand, RunnerError> {
    checked_dir(spec)?;
    match spec.container_image() {
        Some(image) => {
            let script = script_of(spec)?;
            Ok(docker_command(workspace, image, script, spec, options))
        }
        None => Ok(host_command(workspace, spec, options)),
    }
}

pub(crate) fn script_of(spec: &StepSpec) -> Result<&str, RunnerError> {
    spec.script_path
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RunnerError::InvalidSpec(format!("{}: container step without script", spec.key)))
}

/// Step directories are relative to the workspace and may not climb out of it.
pub(crate) fn checked_dir(spec: &StepSpec) -> Result<(), RunnerError> {
    if is_contained(&spec.dir) {
        Ok(())
    } else {
        Err(RunnerError::InvalidSpec(format!(
            "{}: step dir {:?} leaves the workspace",
            spec.key, spec.dir
        )))
    }
}
