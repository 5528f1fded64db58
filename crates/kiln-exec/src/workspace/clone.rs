use std::path::Path;

use kiln_core::CommandRunner;
use kiln_log::ExecutionLogger;
use kiln_model::{BuiltCommand, Job, Operation};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::WorkspaceError;

/// Where repositories are fetched from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneOptions {
    /// Base URL of the git proxy; the repository name is appended.
    pub endpoint: String,
    /// Sent as `Authorization: token-executor <token>`. Callers add it to the job's redactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl CloneOptions {
    pub fn clone_url(&self, repository: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), repository)
    }

    fn auth_args(&self) -> Vec<String> {
        let mut args = vec!["-c".to_string(), "protocol.version=2".to_string()];
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            args.push("-c".into());
            args.push(format!("http.extraHeader=Authorization: token-executor {token}"));
        }
        args
    }
}

/// `fetch` arguments: tags, then depth, then blob filter, then `origin <commit>`.
pub fn fetch_args(job: &Job) -> Vec<String> {
    let mut args: Vec<String> = ["fetch", "--progress", "--no-recurse-submodules"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(if job.fetch_tags { "--tags" } else { "--no-tags" }.into());
    if job.shallow_clone {
        args.push("--depth=1".into());
    }
    if !job.sparse_checkout.is_empty() {
        args.push("--filter=blob:none".into());
    }
    args.push("origin".into());
    args.push(job.commit.clone());
    args
}

/// The ordered git invocations that check out `job.commit` into `dir`.
pub fn clone_commands(dir: &Path, job: &Job, options: &CloneOptions) -> Vec<BuiltCommand> {
    let dir = dir.display().to_string();
    let git = |op: Operation, args: Vec<String>| {
        let mut argv = vec!["git".to_string(), "-C".to_string(), dir.clone()];
        argv.extend(args);
        BuiltCommand::new(op.as_str(), op, argv)
    };
    let plain = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut commands = vec![
        git(Operation::SetupGitInit, plain(&["init"])),
        git(
            Operation::SetupGitAddRemote,
            vec!["remote".into(), "add".into(), "origin".into(), options.clone_url(&job.repository_name)],
        ),
        git(Operation::SetupGitDisableGc, plain(&["config", "--local", "gc.auto", "0"])),
    ];

    let mut fetch = options.auth_args();
    fetch.extend(fetch_args(job));
    commands.push(git(Operation::SetupGitFetch, fetch));

    let sparse = !job.sparse_checkout.is_empty();
    if sparse {
        commands.push(git(
            Operation::SetupGitSparseCheckoutConfig,
            plain(&["config", "--local", "core.sparseCheckout", "1"]),
        ));
        let mut set = plain(&["sparse-checkout", "set", "--no-cone", "--"]);
        set.extend(job.sparse_checkout.iter().cloned());
        commands.push(git(Operation::SetupGitSparseCheckoutSet, set));
    }

    // A sparse checkout fetches the filtered blobs lazily and needs credentials.
    let mut checkout = if sparse { options.auth_args() } else { Vec::new() };
    checkout.extend(plain(&["checkout", "--progress", "--force"]));
    checkout.push(job.commit.clone());
    commands.push(git(Operation::SetupGitCheckout, checkout));

    // Leave no proxy URL (or credentials) behind in the checked out config.
    commands.push(git(
        Operation::SetupGitSetRemoteUrl,
        vec!["remote".into(), "set-url".into(), "origin".into(), job.repository_name.clone()],
    ));
    commands
}

/// Run the clone sequence, stopping at the first failure.
pub async fn clone_repository(
    commands: &dyn CommandRunner,
    logger: &ExecutionLogger,
    cancel: &CancellationToken,
    dir: &Path,
    job: &Job,
    options: &CloneOptions,
) -> Result<(), WorkspaceError> {
    for cmd in clone_commands(dir, job, options) {
        let step = cmd.key.clone();
        commands
            .run(cancel, logger, cmd)
            .await
            .map_err(|source| WorkspaceError::Clone { step, source })?;
    }
    Ok(())
}
