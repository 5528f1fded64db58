pub mod error;
pub use error::{CmdError, ExecError, RunnerError};

pub mod runner;
pub use runner::{Runner, RunnerState};

pub mod command;
pub use command::CommandRunner;

pub mod host;
pub use host::{CmdRunner, RealCmdRunner};

pub mod metrics;
pub use metrics::{MetricsBackend, MetricsHandle, NoopMetrics, Outcome};

pub mod names;
pub use names::NameSet;

pub mod lock;
pub use lock::{VmStartGuard, VmStartLock};
