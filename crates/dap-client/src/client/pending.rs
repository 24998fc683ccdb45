//! Pending request table.
//! - register: reserve a completion slot for an outgoing seq
//! - complete: route a response to its waiter
//! - close: fail every waiter with `Disconnected`

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{DapError, DapResult};
use crate::protocol::Response;

pub(super) type Completion = DapResult<Option<Value>>;

#[derive(Debug)]
struct PendingEntry {
    command: SmolStr,
    sender: oneshot::Sender<Completion>,
}

#[derive(Debug, Default)]
struct PendingTable {
    closed: bool,
    entries: FxHashMap<u32, PendingEntry>,
}

#[derive(Debug, Default)]
pub(super) struct PendingRequests {
    inner: Mutex<PendingTable>,
}

impl PendingRequests {
    pub(super) fn register(
        &self,
        seq: u32,
        command: &str,
    ) -> DapResult<oneshot::Receiver<Completion>> {
        let mut table = self.inner.lock();
        if table.closed {
            return Err(DapError::Disconnected);
        }
        let (sender, receiver) = oneshot::channel();
        table.entries.insert(
            seq,
            PendingEntry {
                command: SmolStr::new(command),
                sender,
            },
        );
        Ok(receiver)
    }

    /// Drop a waiter without completing it. The adapter request stays live.
    pub(super) fn cancel(&self, seq: u32) {
        if self.inner.lock().entries.remove(&seq).is_some() {
            debug!(seq, "pending request abandoned by caller");
        }
    }

    /// Route a response to its waiter. Returns `false` for an unmatched `request_seq`.
    pub(super) fn complete(&self, response: Response<Value>) -> bool {
        let Some(entry) = self.inner.lock().entries.remove(&response.request_seq) else {
            warn!(
                request_seq = response.request_seq,
                command = %response.command,
                "discarding response for unknown request"
            );
            return false;
        };
        let outcome = if response.success {
            Ok(response.body)
        } else {
            Err(DapError::Adapter {
                command: entry.command.clone(),
                message: failure_message(response.message, response.body.as_ref()),
            })
        };
        if entry.sender.send(outcome).is_err() {
            debug!(
                request_seq = response.request_seq,
                command = %entry.command,
                "response arrived after caller stopped waiting"
            );
        }
        true
    }

    /// Fail every waiter with `Disconnected` and refuse new registrations.
    /// Returns `false` if the table was already closed.
    pub(super) fn close(&self) -> bool {
        let entries = {
            let mut table = self.inner.lock();
            if table.closed {
                return false;
            }
            table.closed = true;
            std::mem::take(&mut table.entries)
        };
        for (seq, entry) in entries {
            debug!(seq, command = %entry.command, "failing pending request on disconnect");
            let _ = entry.sender.send(Err(DapError::Disconnected));
        }
        true
    }

    pub(super) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Prefer the formatted `body.error` message, then `message`.
fn failure_message(message: Option<String>, body: Option<&Value>) -> String {
    body.and_then(|body| body.get("error"))
        .and_then(|error| error.get("format"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(message)
        .unwrap_or_else(|| "request failed".to_string())
}
