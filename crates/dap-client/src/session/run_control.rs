//! Run-control requests.
//! - continue_thread: resume, honouring `allThreadsContinued`
//! - next/step_in/step_out: single-thread stepping
//! - pause: request a stop; the `stopped` event does the transition

use tracing::debug;

use crate::error::DapResult;
use crate::protocol::{ContinueArguments, ContinueResponseBody, ThreadArguments};
use crate::types::Generation;

use super::DebugSession;

impl DebugSession {
    pub async fn continue_thread(&self, thread_id: i64) -> DapResult<()> {
        let issued_at = self.issued_at(thread_id);
        let body: ContinueResponseBody = self
            .client
            .request("continue", ContinueArguments { thread_id })
            .await?;
        // Omitted means every thread resumed.
        let all = body.all_threads_continued.unwrap_or(true);
        self.resumed(thread_id, issued_at, all);
        Ok(())
    }

    pub async fn next(&self, thread_id: i64) -> DapResult<()> {
        self.step("next", thread_id).await
    }

    pub async fn step_in(&self, thread_id: i64) -> DapResult<()> {
        self.step("stepIn", thread_id).await
    }

    pub async fn step_out(&self, thread_id: i64) -> DapResult<()> {
        self.step("stepOut", thread_id).await
    }

    pub async fn pause(&self, thread_id: i64) -> DapResult<()> {
        let _: serde_json::Value = self
            .client
            .request("pause", ThreadArguments { thread_id })
            .await?;
        Ok(())
    }

    async fn step(&self, command: &'static str, thread_id: i64) -> DapResult<()> {
        let issued_at = self.issued_at(thread_id);
        let _: serde_json::Value = self
            .client
            .request(command, ThreadArguments { thread_id })
            .await?;
        self.resumed(thread_id, issued_at, false);
        Ok(())
    }

    /// Generation the thread is stopped in when a request is issued.
    fn issued_at(&self, thread_id: i64) -> Generation {
        self.shared
            .state
            .lock()
            .stopped_generation(thread_id)
            .unwrap_or(Generation::NONE)
    }

    fn resumed(&self, thread_id: i64, issued_at: Generation, all: bool) {
        let resumed = self
            .shared
            .transition(|state| state.mark_running_if(thread_id, issued_at, all));
        debug!(thread_id, all, resumed = resumed.len(), "run-control request accepted");
        self.shared.notifier.continued(resumed);
    }
}
