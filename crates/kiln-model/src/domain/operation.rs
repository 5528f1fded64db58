use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed taxonomy of observable operations.
///
/// Every command the engine issues is tagged with one of these; metrics are keyed by [`Operation::as_str`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    SetupGitInit,
    SetupGitAddRemote,
    SetupGitDisableGc,
    SetupGitFetch,
    SetupGitSparseCheckoutConfig,
    SetupGitSparseCheckoutSet,
    SetupGitCheckout,
    SetupGitSetRemoteUrl,
    SetupFirecrackerStart,
    SetupFirecrackerStartupScript,
    TeardownFirecrackerRemove,
    #[default]
    Exec,
    KubernetesCreateJob,
    KubernetesWaitJob,
    KubernetesReadLogs,
    KubernetesDeleteJob,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SetupGitInit => "setup.git.init",
            Operation::SetupGitAddRemote => "setup.git.add-remote",
            Operation::SetupGitDisableGc => "setup.git.disable-gc",
            Operation::SetupGitFetch => "setup.git.fetch",
            Operation::SetupGitSparseCheckoutConfig => "setup.git.sparse-checkout-config",
            Operation::SetupGitSparseCheckoutSet => "setup.git.sparse-checkout-set",
            Operation::SetupGitCheckout => "setup.git.checkout",
            Operation::SetupGitSetRemoteUrl => "setup.git.set-remote",
            Operation::SetupFirecrackerStart => "setup.firecracker.start",
            Operation::SetupFirecrackerStartupScript => "setup.firecracker.startup-script",
            Operation::TeardownFirecrackerRemove => "teardown.firecracker.remove",
            Operation::Exec => "exec",
            Operation::KubernetesCreateJob => "kubernetes.create-job",
            Operation::KubernetesWaitJob => "kubernetes.wait-job",
            Operation::KubernetesReadLogs => "kubernetes.logs",
            Operation::KubernetesDeleteJob => "kubernetes.delete-job",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
