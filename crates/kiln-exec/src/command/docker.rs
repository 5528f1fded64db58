use std::path::{Path, PathBuf};

use kiln_model::{BuiltCommand, CONTAINER_DATA_DIR, ResourceLimits, SCRIPTS_PATH, StepSpec};
use serde::{Deserialize, Serialize};

use crate::util::container_path;

/// Knobs shared by every container invocation of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerOptions {
    /// Directory holding a registry `config.json`; passed as `--config`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    /// Add `host.docker.internal` pointing at the host gateway.
    pub add_host_gateway: bool,
    pub resources: ResourceLimits,
}

/// One-shot container running `/data/.kiln-executor/<script>` with the workspace mounted at `/data`.
///
/// Step environment is passed with `-e`; the command carries no process environment of its own.
pub fn docker_command(
    workspace: &Path,
    image: &str,
    script: &str,
    spec: &StepSpec,
    options: &DockerOptions,
) -> BuiltCommand {
    let mut argv: Vec<String> = vec!["docker".into()];
    if let Some(config) = &options.config_path {
        argv.push("--config".into());
        argv.push(config.display().to_string());
    }
    argv.extend(["run".into(), "--rm".into()]);
    if options.add_host_gateway {
        argv.push("--add-host=host.docker.internal:host-gateway".into());
    }
    argv.extend(resource_flags(&options.resources));

    argv.push("-v".into());
    argv.push(format!("{}:{}", host_dir(workspace, &options.resources).display(), CONTAINER_DATA_DIR));
    argv.push("-w".into());
    argv.push(container_path(&[CONTAINER_DATA_DIR, &spec.dir]));
    for kv in spec.env.iter() {
        argv.push("-e".into());
        argv.push(kv.to_string());
    }
    argv.extend(["--entrypoint".into(), "/bin/sh".into()]);
    argv.push(image.to_string());
    argv.push(container_path(&[CONTAINER_DATA_DIR, SCRIPTS_PATH, script]));

    BuiltCommand::new(spec.key.clone(), spec.operation, argv).with_dir(workspace)
}

/// `--cpus`/`--memory`, each omitted when unset.
fn resource_flags(limits: &ResourceLimits) -> Vec<String> {
    let mut flags = Vec::new();
    if limits.num_cpus > 0 {
        flags.push("--cpus".into());
        flags.push(limits.num_cpus.to_string());
    }
    if !limits.memory.is_empty() {
        flags.push("--memory".into());
        flags.push(limits.memory.clone());
    }
    flags
}

/// Path the container engine sees for the workspace.
fn host_dir(workspace: &Path, limits: &ResourceLimits) -> PathBuf {
    match (&limits.docker_host_mount_path, workspace.file_name()) {
        (Some(mount), Some(base)) => mount.join(base),
        _ => workspace.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use kiln_model::StepEnv;

    use super::*;

    fn spec() -> StepSpec {
        StepSpec::container("step.docker.0", "alpine:3.18", "42.0_github.com_o_r@c0ffee.sh")
            .with_dir("sub")
            .with_env(StepEnv::single("FOO", "a b"))
    }

    #[test]
    fn full_invocation_shape() {
        let opts = DockerOptions {
            config_path: Some(PathBuf::from("/tmp/auth")),
            add_host_gateway: true,
            resources: ResourceLimits {
                num_cpus: 4,
                memory: "12G".into(),
                ..Default::default()
            },
        };
        let cmd = docker_command(Path::new("/tmp/ws-1"), "alpine:3.18", "s.sh", &spec(), &opts);
        assert_eq!(
            cmd.argv,
            vec![
                "docker",
                "--config",
                "/tmp/auth",
                "run",
                "--rm",
                "--add-host=host.docker.internal:host-gateway",
                "--cpus",
                "4",
                "--memory",
                "12G",
                "-v",
                "/tmp/ws-1:/data",
                "-w",
                "/data/sub",
                "-e",
                "FOO=a b",
                "--entrypoint",
                "/bin/sh",
                "alpine:3.18",
                "/data/.kiln-executor/s.sh",
            ]
        );
        assert!(cmd.env.is_empty());
    }

    #[test]
    fn unset_limits_emit_no_flags() {
        let cmd = docker_command(
            Path::new("/ws"),
            "alpine",
            "s.sh",
            &StepSpec::container("k", "alpine", "s.sh"),
            &DockerOptions::default(),
        );
        for flag in ["--cpus", "--memory", "--config", "-e"] {
            assert!(!cmd.argv.iter().any(|a| a == flag), "unexpected {flag}");
        }
        assert!(cmd.argv.contains(&"/data".to_string()));
    }

    #[test]
    fn host_mount_override_keeps_basename() {
        let opts = DockerOptions {
            resources: ResourceLimits {
                docker_host_mount_path: Some(PathBuf::from("/node/scratch")),
                ..Default::default()
            },
            ..Default::default()
        };
        let cmd = docker_command(Path::new("/tmp/kiln-workspace-abc"), "alpine", "s.sh", &spec(), &opts);
        assert!(cmd.argv.contains(&"/node/scratch/kiln-workspace-abc:/data".to_string()));
    }

    #[test]
    fn hostile_image_stays_one_token() {
        let cmd = docker_command(
            Path::new("/ws"),
            "--privileged alpine:latest",
            "s.sh",
            &spec(),
            &DockerOptions::default(),
        );
        let at = cmd.argv.iter().position(|a| a == "/bin/sh").unwrap();
        assert_eq!(cmd.argv[at + 1], "--privileged alpine:latest");
        assert!(!cmd.argv.iter().any(|a| a == "--privileged"));
    }
}
