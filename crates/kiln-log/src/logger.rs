use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use kiln_model::{EntryId, ExecutionLogEntry, JobId};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{ExecutionHandle, ExecutionLogStore, LogError, Redactor, handle::Shared};

/// Tuning knobs of the pipeline.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Capacity of the inbound queue; `log` waits when it is full.
    pub queue_capacity: usize,
    /// How often an open entry is re-synced to the store.
    pub sync_interval: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            sync_interval: Duration::from_secs(1),
        }
    }
}

/// Per-job execution logger.
///
/// Owns the inbound queue and the single consumer task. [`flush`](Self::flush) closes the queue
/// and joins the consumer, returning every persistence failure seen along the way.
pub struct ExecutionLogger {
    job_id: JobId,
    redactor: Arc<Redactor>,
    tx: Mutex<Option<mpsc::Sender<Arc<Shared>>>>,
    consumer: Mutex<Option<JoinHandle<Vec<String>>>>,
}

impl ExecutionLogger {
    /// Create a logger and spawn its consumer on the current tokio runtime.
    pub fn new<I, K, V>(store: Arc<dyn ExecutionLogStore>, job_id: JobId, replacements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_options(store, job_id, replacements, LogOptions::default())
    }

    pub fn with_options<I, K, V>(
        store: Arc<dyn ExecutionLogStore>,
        job_id: JobId,
        replacements: I,
        opts: LogOptions,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (tx, rx) = mpsc::channel(opts.queue_capacity.max(1));
        let consumer = tokio::spawn(consume(store, job_id, rx, opts.sync_interval));

        Self {
            job_id,
            redactor: Arc::new(Redactor::new(replacements)),
            tx: Mutex::new(Some(tx)),
            consumer: Mutex::new(Some(consumer)),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Open a new entry for `key` running `command`.
    ///
    /// The command is redacted before the entry is queued. After [`flush`](Self::flush) the handle still works
    /// but is never persisted.
    pub async fn log(&self, key: impl Into<String>, command: &[String]) -> ExecutionHandle {
        let handle = ExecutionHandle::new(key.into(), command.to_vec(), Arc::clone(&self.redactor));

        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => {
                if tx.send(handle.shared()).await.is_err() {
                    warn!(target: "kiln.log", job = self.job_id, "log consumer gone; entry will not be persisted");
                }
            }
            None => {
                warn!(target: "kiln.log", job = self.job_id, "logger already flushed; entry will not be persisted");
            }
        }
        handle
    }

    /// Close the queue and wait until every queued entry has been persisted.
    ///
    /// Waits for all outstanding handles to be closed. Idempotent.
    pub async fn flush(&self) -> Result<(), LogError> {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(consumer) = consumer else {
            return Ok(());
        };

        let failures = consumer
            .await
            .map_err(|e| LogError::Consumer(e.to_string()))?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LogError::Persistence(failures))
        }
    }
}

async fn consume(
    store: Arc<dyn ExecutionLogStore>,
    job_id: JobId,
    mut rx: mpsc::Receiver<Arc<Shared>>,
    interval: Duration,
) -> Vec<String> {
    let mut failures = Vec::new();

    while let Some(shared) = rx.recv().await {
        let initial = shared.snapshot();
        let key = initial.key.clone();

        let entry_id = match store.add_execution_log_entry(job_id, initial.clone()).await {
            Ok(id) => id,
            Err(e) => {
                error!(target: "kiln.log", job = job_id, %key, error = %e, "failed to add execution log entry");
                failures.push(format!("{key}: {e}"));
                continue;
            }
        };
        debug!(target: "kiln.log", job = job_id, %key, entry = entry_id, "execution log entry added");

        sync_entry(&*store, job_id, entry_id, &shared, initial, interval, &mut failures).await;
    }

    failures
}

/// Push updates of one entry until its handle is closed; the final state is always attempted once more.
async fn sync_entry(
    store: &dyn ExecutionLogStore,
    job_id: JobId,
    entry_id: EntryId,
    shared: &Shared,
    mut last: ExecutionLogEntry,
    interval: Duration,
    failures: &mut Vec<String>,
) {
    loop {
        let last_write = tokio::select! {
            _ = shared.done().cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        };

        let current = shared.snapshot();
        if current != last {
            match store
                .update_execution_log_entry(job_id, entry_id, current.clone())
                .await
            {
                Ok(()) => last = current,
                Err(e) => {
                    error!(target: "kiln.log", job = job_id, key = %current.key, entry = entry_id, error = %e, "failed to update execution log entry");
                    if last_write {
                        failures.push(format!("{}: {e}", current.key));
                    }
                }
            }
        }

        if last_write {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Add(String),
        Update(i64, ExecutionLogEntry),
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        entries: Mutex<Vec<ExecutionLogEntry>>,
        fail_key: Option<String>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
        fn seen(&self) -> Vec<ExecutionLogEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionLogStore for RecordingStore {
        async fn add_execution_log_entry(
            &self,
            _job_id: JobId,
            entry: ExecutionLogEntry,
        ) -> Result<EntryId, LogError> {
            if self.fail_key.as_deref() == Some(entry.key.as_str()) {
                return Err(LogError::Store("unavailable".into()));
            }
            self.entries.lock().unwrap().push(entry.clone());
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Add(entry.key));
            Ok(calls.len() as EntryId)
        }

        async fn update_execution_log_entry(
            &self,
            _job_id: JobId,
            entry_id: EntryId,
            entry: ExecutionLogEntry,
        ) -> Result<(), LogError> {
            self.entries.lock().unwrap().push(entry.clone());
            self.calls.lock().unwrap().push(Call::Update(entry_id, entry));
            Ok(())
        }
    }

    fn fast() -> LogOptions {
        LogOptions {
            queue_capacity: 8,
            sync_interval: Duration::from_millis(10),
        }
    }

    fn argv(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    fn added_keys(calls: &[Call]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Add(k) => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn entries_are_persisted_in_log_order_not_completion_order() {
        let store = Arc::new(RecordingStore::default());
        let logger = ExecutionLogger::with_options(
            store.clone(),
            1,
            Vec::<(String, String)>::new(),
            fast(),
        );

        // Interleaved submissions from two steps.
        let a1 = logger.log("step-a.1", &argv(&["a"])).await;
        let b1 = logger.log("step-b.1", &argv(&["b"])).await;
        let a2 = logger.log("step-a.2", &argv(&["a"])).await;

        // Complete in reverse order from independent tasks.
        let mut tasks = Vec::new();
        for (delay, h) in [(0u64, a2), (20, b1), (40, a1)] {
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                h.write_line("stdout", "done");
                h.finalize(0);
                h.close();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        logger.flush().await.unwrap();
        assert_eq!(
            added_keys(&store.calls()),
            vec!["step-a.1", "step-b.1", "step-a.2"]
        );
    }

    #[tokio::test]
    async fn final_state_is_synced_with_exit_code() {
        let store = Arc::new(RecordingStore::default());
        let logger =
            ExecutionLogger::with_options(store.clone(), 1, Vec::<(String, String)>::new(), fast());

        let h = logger.log("exec", &argv(&["echo", "hi"])).await;
        h.write_line("stdout", "hi");
        h.finalize(3);
        drop(h);

        logger.flush().await.unwrap();

        let last = store.seen().pop().unwrap();
        assert_eq!(last.exit_code, Some(3));
        assert_eq!(last.out, "stdout: hi\n");
    }

    #[tokio::test]
    async fn secrets_never_reach_the_store() {
        let store = Arc::new(RecordingStore::default());
        let logger = ExecutionLogger::with_options(
            store.clone(),
            1,
            [("sup3r-s3cret", "PASSWORD_REMOVED")],
            fast(),
        );

        let h = logger
            .log("setup.git.fetch", &argv(&["git", "-c", "token=sup3r-s3cret", "fetch"]))
            .await;
        h.write_line("stderr", "auth with sup3r-s3cret failed");
        h.finalize(1);
        drop(h);
        logger.flush().await.unwrap();

        let seen = store.seen();
        assert!(!seen.is_empty());
        for entry in seen {
            assert!(entry.command.iter().all(|a| !a.contains("sup3r-s3cret")));
            assert!(!entry.out.contains("sup3r-s3cret"));
        }
        let last = store.seen().pop().unwrap();
        assert!(last.command.contains(&"token=PASSWORD_REMOVED".to_string()));
        assert!(last.out.contains("PASSWORD_REMOVED"));
    }

    #[tokio::test]
    async fn persistence_failure_does_not_stop_draining() {
        let store = Arc::new(RecordingStore {
            fail_key: Some("broken".into()),
            ..Default::default()
        });
        let logger =
            ExecutionLogger::with_options(store.clone(), 1, Vec::<(String, String)>::new(), fast());

        for key in ["first", "broken", "last"] {
            let h = logger.log(key, &[]).await;
            h.finalize(0);
        }

        let err = logger.flush().await.unwrap_err();
        assert!(matches!(err, LogError::Persistence(ref f) if f.len() == 1));
        assert_eq!(added_keys(&store.calls()), vec!["first", "last"]);
    }

    #[tokio::test]
    async fn flush_is_idempotent_and_late_entries_are_dropped() {
        let store = Arc::new(RecordingStore::default());
        let logger =
            ExecutionLogger::with_options(store.clone(), 1, Vec::<(String, String)>::new(), fast());

        logger.flush().await.unwrap();
        logger.flush().await.unwrap();

        let h = logger.log("late", &[]).await;
        h.finalize(0);
        drop(h);
        assert!(store.calls().is_empty());
    }
}
