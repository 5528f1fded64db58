/// Directory (relative to the workspace root) holding one script per docker step.
pub const SCRIPTS_PATH: &str = ".kiln-executor";

/// Mount point of the workspace inside a one-shot container.
pub const CONTAINER_DATA_DIR: &str = "/data";

/// Mount point of the workspace block device inside a micro-VM.
pub const VM_WORKSPACE_DIR: &str = "/work";

/// Location of the generated registry credentials inside a micro-VM.
pub const VM_DOCKER_CONFIG_DIR: &str = "/etc/docker/cli";

/// Location of the generated docker daemon config inside a micro-VM.
pub const VM_DOCKER_DAEMON_CONFIG: &str = "/etc/docker/daemon.json";
