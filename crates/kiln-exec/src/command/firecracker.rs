use std::path::Path;

use kiln_core::RunnerError;
use kiln_model::{BuiltCommand, StepEnv, StepSpec, VM_WORKSPACE_DIR};
use tracing::warn;

use super::{
    DockerOptions, checked_dir, docker_command, host_command, is_env_name, script_of, shell_join, shell_quote,
};

/// Wrap the in-VM invocation of `spec` in `ignite exec <vm> -- sh -c '<line>'`.
///
/// The line is built from individually quoted tokens and then quoted once more as a whole, so the
/// remote shell reconstructs exactly the inner argv.
pub fn firecracker_command(
    vm_name: &str,
    spec: &StepSpec,
    options: &DockerOptions,
) -> Result<BuiltCommand, RunnerError> {
    checked_dir(spec)?;
    let workspace = Path::new(VM_WORKSPACE_DIR);
    let inner = match spec.container_image() {
        Some(image) => docker_command(workspace, image, script_of(spec)?, spec, options),
        None => host_command(workspace, spec, options),
    };

    let dir = inner.dir.as_ref().map(|d| d.display().to_string());
    let line = wrap_in_dir(dir.as_deref(), &inner.env, &inner.argv);

    Ok(BuiltCommand::new(spec.key.clone(), spec.operation, vm_exec_argv(vm_name, &line)))
}

/// `cd <dir> && K='v'... <argv>` with every token quoted.
///
/// Variables whose names are not valid shell identifiers cannot be expressed as assignments and
/// are dropped.
pub fn wrap_in_dir(dir: Option<&str>, env: &StepEnv, argv: &[String]) -> String {
    let mut parts = Vec::with_capacity(env.len() + 3);
    if let Some(dir) = dir {
        parts.push(format!("cd {} &&", shell_quote(dir)));
    }
    for kv in env.iter() {
        if !is_env_name(kv.key()) {
            warn!(target: "kiln.exec.command", key = kv.key(), "dropping env var with invalid name");
            continue;
        }
        parts.push(format!("{}={}", kv.key(), shell_quote(kv.value())));
    }
    parts.push(shell_join(argv));
    parts.join(" ")
}

/// argv that runs `line` through a shell inside the VM.
pub fn vm_exec_argv(vm_name: &str, line: &str) -> Vec<String> {
    vec![
        "ignite".into(),
        "exec".into(),
        vm_name.into(),
        "--".into(),
        "sh".into(),
        "-c".into(),
        shell_quote(line),
    ]
}

/// Strip a `@sha256:<64 hex>` digest, keeping any `:tag`.
pub fn sanitize_image(image: &str) -> String {
    if let Some((name, digest)) = image.rsplit_once("@sha256:") {
        if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return name.to_string();
        }
    }
    image.to_string()
}
