use std::{sync::Arc, time::Duration};

use kiln_model::Operation;

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Sink for engine metrics. Implementations must be cheap and non-blocking.
pub trait MetricsBackend: Send + Sync + 'static {
    /// One invocation of an operation from the fixed taxonomy.
    fn record_operation(&self, operation: Operation, outcome: Outcome);

    /// Time spent waiting for, and holding, the VM start lock.
    fn record_vm_start_lock(&self, wait: Duration, hold: Duration);
}

pub type MetricsHandle = Arc<dyn MetricsBackend>;

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl NoopMetrics {
    pub fn handle() -> MetricsHandle {
        Arc::new(NoopMetrics)
    }
}

impl MetricsBackend for NoopMetrics {
    fn record_operation(&self, _operation: Operation, _outcome: Outcome) {}

    fn record_vm_start_lock(&self, _wait: Duration, _hold: Duration) {}
}
