use std::collections::BTreeSet;

use kiln_core::ExecError;

/// Binaries a step may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    programs: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, program: &str) -> bool {
        self.programs.contains(program)
    }

    /// Validate the first argv token; nothing else is inspected.
    pub fn check<'a>(&self, argv: &'a [String]) -> Result<&'a str, ExecError> {
        match argv.first() {
            Some(program) if self.contains(program) => Ok(program),
            Some(program) => Err(ExecError::IllegalCommand {
                program: program.clone(),
            }),
            None => Err(ExecError::IllegalCommand {
                program: String::new(),
            }),
        }
    }
}

impl Default for AllowList {
    /// Container engine, VCS client, VM manager and the internal CLI.
    fn default() -> Self {
        Self::new(["docker", "git", "ignite", "src"])
    }
}
