use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobId, StepEnv};

/// A dequeued job as handed to the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub id: JobId,
    /// Logical repository name; empty when the job needs no checkout.
    pub repository_name: String,
    /// Sub-directory of the workspace the repository is cloned into.
    pub repository_directory: String,
    pub commit: String,
    pub fetch_tags: bool,
    pub shallow_clone: bool,
    /// Paths for a sparse checkout; empty means full checkout.
    pub sparse_checkout: Vec<String>,
    /// Extra files written into the workspace, keyed by relative path.
    pub files: BTreeMap<String, JobFile>,
    pub docker_steps: Vec<DockerStep>,
    pub cli_steps: Vec<CliStep>,
    /// Sensitive value → placeholder, applied to every log entry.
    pub redacted_values: BTreeMap<String, String>,
    pub docker_auth_config: DockerAuthConfig,
}

/// A step executed as a shell script inside a one-shot container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerStep {
    pub image: String,
    pub commands: Vec<String>,
    pub dir: String,
    pub env: StepEnv,
}

/// A step executed through the restricted internal CLI (`src`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliStep {
    pub commands: Vec<String>,
    pub dir: String,
    pub env: StepEnv,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub content: String,
}

/// Registry credentials in the container engine's `config.json` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerAuthConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuth>,
}

impl DockerAuthConfig {
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerAuth {
    /// Base64 encoded `user:password`.
    pub auth: String,
}
