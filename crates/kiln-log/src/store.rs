use async_trait::async_trait;
use kiln_model::{EntryId, ExecutionLogEntry, JobId};

use crate::LogError;

/// Durable destination of execution log entries (the job queue's log API).
#[async_trait]
pub trait ExecutionLogStore: Send + Sync + 'static {
    /// Persist a new entry and return its identifier.
    async fn add_execution_log_entry(
        &self,
        job_id: JobId,
        entry: ExecutionLogEntry,
    ) -> Result<EntryId, LogError>;

    /// Replace a previously added entry with its current state.
    async fn update_execution_log_entry(
        &self,
        job_id: JobId,
        entry_id: EntryId,
        entry: ExecutionLogEntry,
    ) -> Result<(), LogError>;
}
