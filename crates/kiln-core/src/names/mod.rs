use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Registry of VM names owned by in-flight jobs.
///
/// Shared between job execution and the orphan janitor. A name is added right before the VM is created
/// and removed right after it is torn down, so the janitor never sees a live VM as unowned.
#[derive(Debug, Clone, Default)]
pub struct NameSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, name: impl Into<String>) {
        self.lock().insert(name.into());
    }

    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of the registered names.
    pub fn snapshot(&self) -> HashSet<String> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_snapshot() {
        let names = NameSet::new();
        names.add("kiln-a");
        names.add("kiln-b");
        names.add("kiln-a");
        assert_eq!(names.len(), 2);

        let snap = names.snapshot();
        names.remove("kiln-a");
        assert!(snap.contains("kiln-a"));
        assert!(!names.contains("kiln-a"));
        assert!(names.contains("kiln-b"));
    }

    #[test]
    fn clones_share_state() {
        let names = NameSet::new();
        let other = names.clone();
        other.add("vm");
        assert!(names.contains("vm"));
        names.remove("vm");
        assert!(other.is_empty());
    }
}
