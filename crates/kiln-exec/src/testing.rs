//! Test doubles shared by the module tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use kiln_core::{CmdError, CmdRunner, CommandRunner, ExecError};
use kiln_log::{ExecutionLogStore, ExecutionLogger, LogError};
use kiln_model::{BuiltCommand, EntryId, ExecutionLogEntry, JobId};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MemStore {
    pub entries: Mutex<Vec<ExecutionLogEntry>>,
}

impl MemStore {
    pub fn snapshot(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionLogStore for MemStore {
    async fn add_execution_log_entry(&self, _job: JobId, entry: ExecutionLogEntry) -> Result<EntryId, LogError> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry);
        Ok(entries.len() as EntryId - 1)
    }

    async fn update_execution_log_entry(
        &self,
        _job: JobId,
        id: EntryId,
        entry: ExecutionLogEntry,
    ) -> Result<(), LogError> {
        self.entries.lock().unwrap()[id as usize] = entry;
        Ok(())
    }
}

pub fn logger() -> (Arc<MemStore>, Arc<ExecutionLogger>) {
    let store = Arc::new(MemStore::default());
    let logger = Arc::new(ExecutionLogger::new(store.clone(), 1, Vec::<(String, String)>::new()));
    (store, logger)
}

/// Records every command; fails the ones whose key starts with `fail_prefix`.
///
/// With `cancel_at`, the matching command cancels the given token and ends as a killed process would.
/// Commands issued under an already cancelled token end the same way.
#[derive(Default)]
pub struct RecordingCommands {
    pub calls: Mutex<Vec<BuiltCommand>>,
    pub fail_prefix: Mutex<Option<String>>,
    pub cancel_at: Mutex<Option<(String, CancellationToken)>>,
    /// Whether the caller's token was cancelled when each call arrived.
    pub cancelled: Mutex<Vec<bool>>,
}

impl RecordingCommands {
    pub fn failing(prefix: &str) -> Self {
        Self {
            fail_prefix: Mutex::new(Some(prefix.to_string())),
            ..Default::default()
        }
    }

    pub fn cancelling(prefix: &str, token: CancellationToken) -> Self {
        Self {
            cancel_at: Mutex::new(Some((prefix.to_string(), token))),
            ..Default::default()
        }
    }

    /// Key of every call made under a live token.
    pub fn live_keys(&self) -> Vec<String> {
        let cancelled = self.cancelled.lock().unwrap().clone();
        self.keys()
            .into_iter()
            .zip(cancelled)
            .filter(|(_, c)| !c)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.key.clone()).collect()
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().iter().map(|c| c.argv.clone()).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingCommands {
    async fn run(
        &self,
        cancel: &CancellationToken,
        logger: &ExecutionLogger,
        cmd: BuiltCommand,
    ) -> Result<(), ExecError> {
        let handle = logger.log(cmd.key.clone(), &cmd.argv).await;
        self.cancelled.lock().unwrap().push(cancel.is_cancelled());
        let trigger = self
            .cancel_at
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(p, _)| cmd.key.starts_with(p.as_str()))
            .map(|(_, token)| token.clone());
        if let Some(token) = trigger {
            token.cancel();
        }
        if cancel.is_cancelled() {
            self.calls.lock().unwrap().push(cmd);
            handle.finalize(-1);
            return Err(ExecError::Cancelled);
        }
        let fail = self
            .fail_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|p| cmd.key.starts_with(p));
        let key = cmd.key.clone();
        self.calls.lock().unwrap().push(cmd);
        if fail {
            handle.finalize(1);
            Err(ExecError::NonZeroExit { key, code: 1 })
        } else {
            handle.finalize(0);
            Ok(())
        }
    }
}

/// Records host tool invocations and replays scripted replies in order.
///
/// Calls without a scripted reply succeed with empty output.
#[derive(Default)]
pub struct ScriptedHost {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub replies: Mutex<VecDeque<(String, Result<String, String>)>>,
}

impl ScriptedHost {
    /// Reply to the next call of `program` with `reply`.
    pub fn reply(&self, program: &str, reply: Result<&str, &str>) {
        self.replies.lock().unwrap().push_back((
            program.to_string(),
            reply.map(str::to_string).map_err(str::to_string),
        ));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c[0].clone()).collect()
    }
}

#[async_trait]
impl CmdRunner for ScriptedHost {
    async fn combined_output(
        &self,
        _cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<String, CmdError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call.clone());

        let mut replies = self.replies.lock().unwrap();
        let reply = replies
            .iter()
            .position(|(p, _)| p == program)
            .and_then(|i| replies.remove(i));
        match reply {
            Some((_, Ok(out))) => Ok(out),
            Some((_, Err(output))) => Err(CmdError::Failed {
                command: call.join(" "),
                status: "exit status: 1".into(),
                output,
            }),
            None => Ok(String::new()),
        }
    }
}
