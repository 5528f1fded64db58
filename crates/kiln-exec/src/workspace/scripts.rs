use std::path::Path;

use kiln_log::ExecutionLogger;
use kiln_model::{Job, SCRIPTS_PATH};

use super::paths::{checked_relative, create_dir_within, refuse_symlink};
use crate::error::WorkspaceError;

/// Prepended to every step script. Scripts are started by `/bin/sh`; switch to bash when the image has it.
pub const SCRIPT_PREAMBLE: &str = r#"# Re-exec under bash when available.
if [ -z "$BASH_VERSION" ] && command -v bash >/dev/null 2>&1; then
  exec bash "$0" "$@"
fi
"#;

/// `<job>.<step>_<repo with / as _>@<commit>.sh`
pub fn script_name(job: &Job, step: usize) -> String {
    format!(
        "{}.{}_{}@{}.sh",
        job.id,
        step,
        job.repository_name.replace('/', "_"),
        job.commit
    )
}

pub fn script_body(commands: &[String]) -> String {
    format!("{SCRIPT_PREAMBLE}\nset -x\n{}\n", commands.join("\n"))
}

/// Write the job's extra files and one executable script per container step.
///
/// Returns the script file names in step order. Recorded as the `setup.fs.extras` log entry.
pub async fn write_files(logger: &ExecutionLogger, root: &Path, job: &Job) -> Result<Vec<String>, WorkspaceError> {
    let handle = logger.log("setup.fs.extras", &[]).await;

    for (rel, file) in &job.files {
        let rel_path = checked_relative(rel)?;
        let parent = match rel_path.parent() {
            Some(parent) => create_dir_within(root, parent).await?,
            None => root.to_path_buf(),
        };
        let target = match rel_path.file_name() {
            Some(name) => parent.join(name),
            None => return Err(WorkspaceError::InvalidPath(rel.clone())),
        };
        refuse_symlink(&target).await?;
        tokio::fs::write(&target, &file.content)
            .await
            .map_err(|e| WorkspaceError::io(format!("write {rel}"), e))?;
        handle.write_line("stdout", &format!("wrote {rel}"));
    }

    let scripts_dir = create_dir_within(root, Path::new(SCRIPTS_PATH)).await?;

    let mut names = Vec::with_capacity(job.docker_steps.len());
    for (i, step) in job.docker_steps.iter().enumerate() {
        let name = script_name(job, i);
        let path = scripts_dir.join(&name);
        refuse_symlink(&path).await?;
        tokio::fs::write(&path, script_body(&step.commands))
            .await
            .map_err(|e| WorkspaceError::io(format!("write script {name}"), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| WorkspaceError::io(format!("chmod script {name}"), e))?;
        }
        handle.write_line("stdout", &format!("wrote {SCRIPTS_PATH}/{name}"));
        names.push(name);
    }

    handle.finalize(0);
    Ok(names)
}
