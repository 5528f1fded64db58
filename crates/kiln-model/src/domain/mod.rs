mod kv;
pub use kv::KeyValue;

mod step_env;
pub use step_env::StepEnv;

mod limits;
pub use limits::{ResourceLimits, parse_size};

mod operation;
pub use operation::Operation;

mod log_entry;
pub use log_entry::ExecutionLogEntry;

mod constants;
pub use constants::*;

/// Identifier of a job record in the remote queue.
pub type JobId = i64;

/// Identifier of an execution log entry assigned by the log store.
pub type EntryId = i64;
