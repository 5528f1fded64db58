use std::time::Duration;

use kiln_core::{MetricsBackend, Outcome};
use kiln_model::Operation;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Lock waits range from nothing to a queue of slow VM boots.
const LOCK_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    operations: IntCounterVec,
    lock_wait: Histogram,
    lock_hold: Histogram,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the kiln collectors on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let operations = IntCounterVec::new(
            Opts::new("kiln_operations_total", "Executor operations by name and outcome"),
            &["operation", "outcome"],
        )?;
        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("kiln_vm_start_lock_wait_seconds", "Time spent waiting for the VM start lock")
                .buckets(LOCK_BUCKETS.to_vec()),
        )?;
        let lock_hold = Histogram::with_opts(
            HistogramOpts::new("kiln_vm_start_lock_hold_seconds", "Time the VM start lock was held")
                .buckets(LOCK_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(lock_wait.clone()))?;
        registry.register(Box::new(lock_hold.clone()))?;

        Ok(Self {
            registry,
            operations,
            lock_wait,
            lock_hold,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_operation(&self, operation: Operation, outcome: Outcome) {
        self.operations
            .with_label_values(&[operation.as_str(), outcome.as_str()])
            .inc();
    }

    fn record_vm_start_lock(&self, wait: Duration, hold: Duration) {
        self.lock_wait.observe(wait.as_secs_f64());
        self.lock_hold.observe(hold.as_secs_f64());
    }
}
