use std::time::Duration;

use tokio::process::Child;

/// Ask the child to stop, escalating to a hard kill after `grace`.
#[cfg(target_family = "unix")]
pub async fn kill_graceful(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    if let Some(id) = child.id() {
        // SAFETY: plain syscall on a pid we own; failure is reported through errno only.
        unsafe {
            libc::kill(id as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return Ok(());
        }
    }
    child.kill().await
}

#[cfg(not(target_family = "unix"))]
pub async fn kill_graceful(child: &mut Child, _grace: Duration) -> std::io::Result<()> {
    child.kill().await
}

/// Whether `rel` only descends: no root, no prefix, no `..`. The empty path qualifies.
pub fn is_contained(rel: &str) -> bool {
    use std::path::{Component, Path};

    Path::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Join container-side path fragments with `/`, ignoring empty ones.
pub fn container_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    if out.is_empty() { "/".to_string() } else { out }
}
