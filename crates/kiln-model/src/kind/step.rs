use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Operation, StepEnv};

/// One unit of work handed to a runner.
///
/// `image == None` runs the command directly (on the host or inside the VM);
/// `image == Some(..)` runs `script_path` inside a one-shot container of that image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Log entry key, e.g. `step.docker.0`.
    pub key: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Script file name under the workspace scripts directory (container mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    /// Program and arguments (host mode).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Working directory relative to the workspace root.
    #[serde(default)]
    pub dir: String,
    #[serde(default, skip_serializing_if = "StepEnv::is_empty")]
    pub env: StepEnv,
}

impl StepSpec {
    /// Host-mode step running `command` verbatim.
    pub fn host<I, S>(key: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Container-mode step running a materialised script inside `image`.
    pub fn container(
        key: impl Into<String>,
        image: impl Into<String>,
        script_path: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            image: Some(image.into()),
            script_path: Some(script_path.into()),
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: StepEnv) -> Self {
        self.env = env;
        self
    }

    /// Returns the container image when the step is container-backed.
    pub fn container_image(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }
}

/// Concrete invocation produced by the command builder; consumed once by the process supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltCommand {
    pub key: String,
    pub operation: Operation,
    pub argv: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: StepEnv,
}

impl BuiltCommand {
    pub fn new<I, S>(key: impl Into<String>, operation: Operation, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operation,
            argv: argv.into_iter().map(Into::into).collect(),
            dir: None,
            env: StepEnv::new(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: StepEnv) -> Self {
        self.env = env;
        self
    }

    /// First argv token, the binary checked against the allow-list.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}
