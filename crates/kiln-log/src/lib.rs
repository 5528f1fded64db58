//! Asynchronous, ordered, redacting execution-log pipeline.
//!
//! Steps obtain an [`ExecutionHandle`] from [`ExecutionLogger::log`], write their output into it and finalize it with an exit code.
//! A single background consumer persists handles through an [`ExecutionLogStore`] in the exact order they were logged,
//! so concurrent steps never reorder each other's entries and never wait on the store themselves.
//!
//! Secrets are replaced before anything is queued: the command line when the handle is created, the output on every write.

mod error;
pub use error::LogError;

mod redact;
pub use redact::Redactor;

mod store;
pub use store::ExecutionLogStore;

mod handle;
pub use handle::ExecutionHandle;

mod logger;
pub use logger::{ExecutionLogger, LogOptions};
