//! Removes VMs that carry our name prefix but are no longer tracked by any running job.
//!
//! Best effort: a failed listing skips the tick, a failed removal is logged and retried next tick.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use kiln_core::{CmdError, CmdRunner, NameSet};
use serde::{Deserialize, Serialize};
use taskvisor::{TaskError, TaskFn, TaskRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SLOT: &str = "kiln-janitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JanitorConfig {
    /// Only VMs whose name starts with this prefix are considered.
    pub prefix: String,
    pub interval_ms: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            prefix: "kiln".into(),
            interval_ms: 60_000,
        }
    }
}

impl JanitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

pub struct Janitor {
    config: JanitorConfig,
    names: NameSet,
    host: Arc<dyn CmdRunner>,
}

impl Janitor {
    /// `names` must be the same set the VM runners register into.
    pub fn new(config: JanitorConfig, names: NameSet, host: Arc<dyn CmdRunner>) -> Self {
        Self { config, names, host }
    }

    /// One sweep. Returns how many VMs were removed.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<usize, CmdError> {
        let listing = self
            .host
            .combined_output(cancel, "ignite", &["ps", "-t", "{{ .Name }}:{{ .UID }}"])
            .await?;
        let active = parse_active(&listing, &self.config.prefix);
        // Snapshot after listing: a VM is registered before it is started.
        let expected = self.names.snapshot();

        let mut removed = 0;
        for id in orphans(&active, &expected) {
            match self
                .host
                .combined_output(cancel, "ignite", &["rm", "-f", id.as_str()])
                .await
            {
                Ok(_) => {
                    info!(target: "kiln.janitor", vm = %id, "removed orphaned vm");
                    removed += 1;
                }
                Err(e) => warn!(target: "kiln.janitor", vm = %id, error = %e, "failed to remove orphaned vm"),
            }
        }
        Ok(removed)
    }

    /// Sweep every interval until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) {
        let interval = self.config.interval();
        loop {
            match self.tick(cancel).await {
                Ok(removed) => debug!(target: "kiln.janitor", removed, "sweep done"),
                Err(e) => warn!(target: "kiln.janitor", error = %e, "failed to list vms"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// The sweep loop as a supervised task; it ends when the supervisor cancels it.
    pub fn task(self: Arc<Self>) -> TaskRef {
        TaskFn::arc(SLOT, move |ctx: CancellationToken| {
            let janitor = Arc::clone(&self);
            async move {
                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }
                janitor.run(&ctx).await;
                Ok(())
            }
        })
    }
}

/// Parse `name:id` lines, keeping names with `prefix`. Malformed lines are skipped.
pub fn parse_active(listing: &str, prefix: &str) -> BTreeMap<String, String> {
    listing
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .filter(|(name, id)| name.starts_with(prefix) && !id.is_empty())
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect()
}

/// Ids of active VMs whose names are not expected.
pub fn orphans(active: &BTreeMap<String, String>, expected: &HashSet<String>) -> Vec<String> {
    active
        .iter()
        .filter(|(name, _)| !expected.contains(*name))
        .map(|(_, id)| id.clone())
        .collect()
}
