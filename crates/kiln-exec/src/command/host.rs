use std::path::Path;

use kiln_model::{BuiltCommand, StepSpec};

use super::DockerOptions;

/// Run the step's command verbatim in `workspace/<dir>`.
///
/// When a registry config directory is configured, `DOCKER_CONFIG` points at it so nested
/// container invocations pick up the credentials.
pub fn host_command(workspace: &Path, spec: &StepSpec, options: &DockerOptions) -> BuiltCommand {
    let mut env = spec.env.clone();
    if let Some(config) = &options.config_path {
        env.push("DOCKER_CONFIG", config.display().to_string());
    }

    let dir = if spec.dir.is_empty() {
        workspace.to_path_buf()
    } else {
        workspace.join(&spec.dir)
    };

    BuiltCommand::new(spec.key.clone(), spec.operation, spec.command.clone())
        .with_dir(dir)
        .with_env(env)
}
