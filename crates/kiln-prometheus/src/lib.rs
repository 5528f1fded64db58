//! Prometheus metrics backend for the kiln job runtime.
//!
//! [`PrometheusMetrics`] implements [`kiln_core::MetricsBackend`] on its own [`Registry`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use kiln_prometheus::PrometheusMetrics;
//! use kiln_core::MetricsHandle;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let handle: MetricsHandle = Arc::new(metrics.clone());
//! # let _ = handle;
//!
//! // Serve `metrics.encode()?` from whatever HTTP stack the embedder already runs.
//! # let _ = metrics.encode()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `kiln_operations_total{operation, outcome}` - Counter
//! - `kiln_vm_start_lock_wait_seconds` - Histogram
//! - `kiln_vm_start_lock_hold_seconds` - Histogram

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
