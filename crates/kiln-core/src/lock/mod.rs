use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Mutual exclusion around VM creation.
///
/// The hypervisor tooling is unsafe to invoke concurrently, so every Firecracker runner of a process
/// shares one lock created by the caller. [`VmStartLock::noop`] disables exclusion for tests.
#[derive(Debug, Clone)]
pub struct VmStartLock {
    inner: Option<Arc<Mutex<()>>>,
}

impl VmStartLock {
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(()))),
        }
    }

    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Wait for the lock. The guard remembers how long acquisition took.
    pub async fn acquire(&self) -> VmStartGuard {
        let started = Instant::now();
        let guard = match &self.inner {
            Some(m) => Some(Arc::clone(m).lock_owned().await),
            None => None,
        };
        VmStartGuard {
            _guard: guard,
            waited: started.elapsed(),
            acquired: Instant::now(),
        }
    }
}

impl Default for VmStartLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct VmStartGuard {
    _guard: Option<OwnedMutexGuard<()>>,
    waited: Duration,
    acquired: Instant,
}

impl VmStartGuard {
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Release the lock and return how long it was held.
    pub fn release(self) -> Duration {
        self.acquired.elapsed()
    }
}
