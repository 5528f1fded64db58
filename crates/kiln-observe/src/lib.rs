//! Process-wide diagnostic logging for kiln binaries and embedders.
//!
//! Execution logs shown to users go through `kiln-log`; this crate only wires `tracing`.

mod logger;
pub use logger::*;
