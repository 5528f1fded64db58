use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use kiln_model::ExecutionLogEntry;
use tokio_util::sync::CancellationToken;

use crate::Redactor;

/// Exit code recorded for a step that ended without producing one.
pub(crate) const UNFINISHED_EXIT_CODE: i32 = -1;

/// Log stream of one in-flight step.
///
/// Output is redacted on [`write`](Self::write) and buffered; the background consumer picks up snapshots.
/// The handle is finalized exactly once and closed when dropped, so every exit path
/// (including cancellation and early `?` returns) leaves a complete entry with an exit code.
pub struct ExecutionHandle {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    done: CancellationToken,
    redactor: Arc<Redactor>,
    started: Instant,
}

struct State {
    entry: ExecutionLogEntry,
    finalized: bool,
}

impl ExecutionHandle {
    pub(crate) fn new(key: String, command: Vec<String>, redactor: Arc<Redactor>) -> Self {
        let command = redactor.redact_all(&command);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entry: ExecutionLogEntry::new(key, command),
                    finalized: false,
                }),
                done: CancellationToken::new(),
                redactor,
                started: Instant::now(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn key(&self) -> String {
        self.shared.lock().entry.key.clone()
    }

    /// Append output. Returns the number of input bytes consumed.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let text = self.shared.redactor.redact(&String::from_utf8_lossy(bytes));
        self.shared.lock().entry.out.push_str(&text);
        bytes.len()
    }

    /// Append a single line with a stream prefix (`stdout: ...`).
    pub fn write_line(&self, stream: &str, line: &str) {
        self.write(format!("{stream}: {line}\n").as_bytes());
    }

    /// Record the exit code and duration. Only the first call has an effect.
    pub fn finalize(&self, exit_code: i32) {
        let duration_ms = self.shared.started.elapsed().as_millis() as u64;
        let mut state = self.shared.lock();
        if state.finalized {
            return;
        }
        state.finalized = true;
        state.entry.exit_code = Some(exit_code);
        state.entry.duration_ms = Some(duration_ms);
    }

    pub fn is_finalized(&self) -> bool {
        self.shared.lock().finalized
    }

    /// Signal that no more output follows; the consumer performs its last sync.
    pub fn close(&self) {
        self.shared.done.cancel();
    }

    pub fn current(&self) -> ExecutionLogEntry {
        self.shared.snapshot()
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        self.finalize(UNFINISHED_EXIT_CODE);
        self.close();
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> ExecutionLogEntry {
        self.lock().entry.clone()
    }

    pub(crate) fn done(&self) -> &CancellationToken {
        &self.done
    }
}
