//! Inspection requests.
//! - list_threads/threads: adapter listing and local snapshot
//! - stack_trace: cached per stop
//! - scopes: generation-stamped scopes of a frame
//! - select_thread/select_frame/selected_frame: local selection
//! - expand/collapse/set_variable: variable tree access

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{DapError, DapResult};
use crate::protocol::{
    ScopesArguments, ScopesResponseBody, StackTraceArguments, StackTraceResponseBody,
    ThreadsResponseBody,
};
use crate::types::{Generation, Scope, StackFrame, Thread, Variable, VariableRef};

use super::DebugSession;

impl DebugSession {
    /// Ask the adapter for its threads and merge them into local state.
    pub async fn list_threads(&self) -> DapResult<Vec<Thread>> {
        let body: ThreadsResponseBody = self.client.request("threads", None::<Value>).await?;
        Ok(self.shared.transition(|state| {
            state.merge_threads(body.threads);
            state.threads()
        }))
    }

    /// Local snapshot, adapter order.
    #[must_use]
    pub fn threads(&self) -> Vec<Thread> {
        self.shared.state.lock().threads()
    }

    /// Flip a thread's expansion flag. `None` for unknown threads.
    pub fn toggle_thread_expanded(&self, thread_id: i64) -> Option<bool> {
        self.shared.state.lock().toggle_expanded(thread_id)
    }

    /// Frames of a stopped thread. Repeated calls within one stop reuse the
    /// first response.
    pub async fn stack_trace(&self, thread_id: i64) -> DapResult<Arc<[StackFrame]>> {
        let generation = {
            let state = self.shared.state.lock();
            let Some(generation) = state.stopped_generation(thread_id) else {
                return Err(DapError::NotStopped { thread_id });
            };
            if let Some(frames) = state.frames(thread_id, generation) {
                return Ok(frames);
            }
            generation
        };

        let body: StackTraceResponseBody = self
            .client
            .request(
                "stackTrace",
                StackTraceArguments {
                    thread_id,
                    start_frame: None,
                    levels: None,
                },
            )
            .await?;
        let frames = body
            .stack_frames
            .iter()
            .map(StackFrame::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let frames: Arc<[StackFrame]> = Arc::from(frames);

        let mut state = self.shared.state.lock();
        if !state.store_frames(thread_id, generation, Arc::clone(&frames)) {
            debug!(thread_id, %generation, "stack trace arrived after the thread moved on");
            return Err(DapError::NotStopped { thread_id });
        }
        Ok(frames)
    }

    /// Scopes of a frame from the current stop of its thread.
    pub async fn scopes(&self, frame_id: i64) -> DapResult<Vec<Scope>> {
        let Some((thread_id, generation)) = self.shared.state.lock().frame_owner(frame_id) else {
            return Err(DapError::StaleFrame { frame_id });
        };
        let body: ScopesResponseBody = self
            .client
            .request("scopes", ScopesArguments { frame_id })
            .await?;
        if self.shared.state.lock().stopped_generation(thread_id) != Some(generation) {
            return Err(DapError::StaleFrame { frame_id });
        }
        let scopes = body
            .scopes
            .iter()
            .map(|json| Scope::from_json(json, generation))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scopes)
    }

    /// Generation that references returned for `frame_id` belong to: the
    /// frame's stop, or the latest live stop when no frame is given.
    pub(crate) fn generation_for_frame(&self, frame_id: Option<i64>) -> DapResult<Generation> {
        let state = self.shared.state.lock();
        match frame_id {
            Some(frame_id) => state
                .frame_owner(frame_id)
                .map(|(_, generation)| generation)
                .ok_or(DapError::StaleFrame { frame_id }),
            None => Ok(state.latest_live_generation().unwrap_or(Generation::NONE)),
        }
    }

    /// Select a thread; its top frame becomes the implicit frame.
    pub fn select_thread(&self, thread_id: i64) -> DapResult<()> {
        let mut state = self.shared.state.lock();
        if !state.contains_thread(thread_id) {
            return Err(DapError::NotStopped { thread_id });
        }
        state.select(Some(thread_id), None);
        Ok(())
    }

    /// Select a frame previously returned by [`DebugSession::stack_trace`].
    pub fn select_frame(&self, frame_id: i64) -> DapResult<()> {
        let mut state = self.shared.state.lock();
        let Some((thread_id, _)) = state.frame_owner(frame_id) else {
            return Err(DapError::StaleFrame { frame_id });
        };
        state.select(Some(thread_id), Some(frame_id));
        Ok(())
    }

    /// The frame used for evaluate/hover: the selected frame if still valid,
    /// otherwise the top frame of the selected (or first stopped) thread.
    pub async fn selected_frame(&self) -> DapResult<StackFrame> {
        let (thread_id, frame_id) = {
            let state = self.shared.state.lock();
            let thread_id = state
                .selected_thread()
                .filter(|thread_id| state.stopped_generation(*thread_id).is_some())
                .or_else(|| state.first_stopped_thread());
            (thread_id, state.selected_frame_id())
        };
        let Some(thread_id) = thread_id else {
            return Err(DapError::NoFrameSelected);
        };
        let frames = match self.stack_trace(thread_id).await {
            Ok(frames) => frames,
            Err(DapError::NotStopped { .. }) => return Err(DapError::NoFrameSelected),
            Err(err) => return Err(err),
        };
        let selected = frame_id.and_then(|frame_id| frames.iter().find(|frame| frame.id == frame_id));
        selected
            .or_else(|| frames.first())
            .cloned()
            .ok_or(DapError::NoFrameSelected)
    }

    /// Children of a scope; empty for scopes without a reference.
    pub async fn scope_variables(&self, scope: &Scope) -> DapResult<Arc<[Variable]>> {
        match scope.children() {
            Some(key) => self.shared.tree.resolve(key).await,
            None => Ok(Arc::from(Vec::new())),
        }
    }

    pub async fn expand(&self, key: VariableRef) -> DapResult<Arc<[Variable]>> {
        self.shared.tree.expand(key).await
    }

    pub fn collapse(&self, key: VariableRef) {
        self.shared.tree.collapse(key);
    }

    #[must_use]
    pub fn is_expanded(&self, key: VariableRef) -> bool {
        self.shared.tree.is_expanded(key)
    }

    /// Requires `supportsSetVariable`.
    pub async fn set_variable(&self, variable: &Variable, value: &str) -> DapResult<Variable> {
        self.require("setVariable", |capabilities| capabilities.supports_set_variable)?;
        self.shared.tree.set_variable(variable, value).await
    }
}
