//! Thread run-state machine.
//! - on_stopped/on_continued/on_thread_*: event transitions, wire order
//! - mark_running_if: run-control success, guarded by generation
//! - frames: per-generation stack trace cache + frame index
//! - selection: thread/frame selection, reset by transitions

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::protocol::{self, Capabilities, StoppedEventBody};
use crate::types::{Generation, StackFrame, Thread};

/// Run state of one thread as tracked by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Stopped(Generation),
    /// Exited, or the whole session terminated.
    Terminated,
}

/// Lifecycle of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Created,
    Initializing,
    Running,
    Terminated,
}

#[derive(Debug)]
struct ThreadEntry {
    thread: Thread,
    state: ThreadState,
    frames: Option<Arc<[StackFrame]>>,
}

impl ThreadEntry {
    fn new(thread: Thread) -> Self {
        Self {
            thread,
            state: ThreadState::Running,
            frames: None,
        }
    }

    fn generation(&self) -> Option<Generation> {
        match self.state {
            ThreadState::Stopped(generation) => Some(generation),
            ThreadState::Running | ThreadState::Terminated => None,
        }
    }

    fn resume(&mut self) {
        self.state = ThreadState::Running;
        self.thread.stopped = false;
        self.frames = None;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Selection {
    thread_id: Option<i64>,
    frame_id: Option<i64>,
}

/// Applied stop, for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StopTransition {
    pub(crate) generation: Generation,
    pub(crate) thread_ids: Vec<i64>,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    phase: SessionPhase,
    last_generation: u64,
    threads: IndexMap<i64, ThreadEntry>,
    exited: FxHashSet<i64>,
    frame_index: FxHashMap<i64, (i64, Generation)>,
    selection: Selection,
    capabilities: Capabilities,
}

impl SessionState {
    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != SessionPhase::Terminated {
            self.phase = phase;
        }
    }

    pub(crate) fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub(crate) fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    fn next_generation(&mut self) -> Generation {
        self.last_generation += 1;
        Generation(self.last_generation)
    }

    fn entry_mut(&mut self, thread_id: i64) -> &mut ThreadEntry {
        self.exited.remove(&thread_id);
        self.threads
            .entry(thread_id)
            .or_insert_with(|| ThreadEntry::new(Thread::new(thread_id, format!("Thread {thread_id}"))))
    }

    pub(crate) fn on_stopped(&mut self, body: &StoppedEventBody) -> Option<StopTransition> {
        if self.phase == SessionPhase::Terminated {
            debug!(reason = %body.reason, "ignoring stop after termination");
            return None;
        }
        let all = body.all_threads_stopped.unwrap_or(false) || body.thread_id.is_none();
        if let Some(thread_id) = body.thread_id {
            self.entry_mut(thread_id);
        }
        let thread_ids: Vec<i64> = if all {
            self.threads.keys().copied().collect()
        } else {
            body.thread_id.into_iter().collect()
        };
        if thread_ids.is_empty() {
            debug!(reason = %body.reason, "stop event names no known thread");
            return None;
        }

        let retired = self.generations_of(&thread_ids);
        let generation = self.next_generation();
        let mut restamped = thread_ids.clone();
        restamped.extend(self.holders_of(&retired, &thread_ids));
        for thread_id in &restamped {
            let entry = self.entry_mut(*thread_id);
            entry.state = ThreadState::Stopped(generation);
            entry.thread.stopped = true;
            entry.frames = None;
        }
        self.frame_index
            .retain(|_, (thread_id, _)| !restamped.contains(thread_id));

        let focus = body
            .thread_id
            .or_else(|| self.first_stopped_thread())
            .filter(|thread_id| thread_ids.contains(thread_id));
        if let Some(thread_id) = focus {
            self.select(Some(thread_id), None);
        } else if self
            .selection
            .thread_id
            .is_some_and(|thread_id| thread_ids.contains(&thread_id))
        {
            self.selection.frame_id = None;
        }
        Some(StopTransition {
            generation,
            thread_ids,
        })
    }

    /// Apply a `continued` event. Returns the threads that left a stop.
    pub(crate) fn on_continued(&mut self, thread_id: i64, all: bool) -> Vec<i64> {
        let targets: Vec<i64> = if all {
            self.threads.keys().copied().collect()
        } else {
            vec![thread_id]
        };
        self.resume_threads(&targets, None)
    }

    /// Apply a successful run-control response. Threads that stopped again
    /// after `issued_at` keep their new stop.
    pub(crate) fn mark_running_if(
        &mut self,
        thread_id: i64,
        issued_at: Generation,
        all: bool,
    ) -> Vec<i64> {
        let targets: Vec<i64> = if all {
            self.threads.keys().copied().collect()
        } else {
            vec![thread_id]
        };
        self.resume_threads(&targets, Some(issued_at))
    }

    fn resume_threads(&mut self, targets: &[i64], not_after: Option<Generation>) -> Vec<i64> {
        let mut resumed = Vec::new();
        let mut retired = FxHashSet::default();
        for thread_id in targets {
            let Some(entry) = self.threads.get_mut(thread_id) else {
                continue;
            };
            let Some(generation) = entry.generation() else {
                continue;
            };
            if not_after.is_some_and(|limit| generation > limit) {
                debug!(thread_id, %generation, "keeping newer stop");
                continue;
            }
            entry.resume();
            retired.insert(generation);
            resumed.push(*thread_id);
        }
        if resumed.is_empty() {
            return resumed;
        }

        // Threads still stopped in a retired generation move to a fresh one.
        let survivors = self.holders_of(&retired, &resumed);
        if !survivors.is_empty() {
            let generation = self.next_generation();
            for thread_id in &survivors {
                if let Some(entry) = self.threads.get_mut(thread_id) {
                    entry.state = ThreadState::Stopped(generation);
                    entry.frames = None;
                }
            }
        }
        self.frame_index.retain(|_, (thread_id, _)| {
            !resumed.contains(thread_id) && !survivors.contains(thread_id)
        });
        if self
            .selection
            .thread_id
            .is_some_and(|thread_id| resumed.contains(&thread_id) || survivors.contains(&thread_id))
        {
            self.selection.frame_id = None;
        }
        resumed
    }

    fn generations_of(&self, thread_ids: &[i64]) -> FxHashSet<Generation> {
        thread_ids
            .iter()
            .filter_map(|thread_id| self.threads.get(thread_id))
            .filter_map(ThreadEntry::generation)
            .collect()
    }

    /// Threads outside `except` stopped in one of `generations`.
    fn holders_of(&self, generations: &FxHashSet<Generation>, except: &[i64]) -> Vec<i64> {
        self.threads
            .iter()
            .filter(|(thread_id, entry)| {
                !except.contains(*thread_id)
                    && entry
                        .generation()
                        .is_some_and(|generation| generations.contains(&generation))
            })
            .map(|(thread_id, _)| *thread_id)
            .collect()
    }

    pub(crate) fn on_thread_started(&mut self, thread_id: i64) {
        self.entry_mut(thread_id);
    }

    /// Returns `false` for an exit of an unknown or already exited thread.
    pub(crate) fn on_thread_exited(&mut self, thread_id: i64) -> bool {
        if self.threads.shift_remove(&thread_id).is_none() {
            if self.exited.contains(&thread_id) {
                warn!(thread_id, "duplicate thread exit");
            }
            return false;
        }
        self.exited.insert(thread_id);
        self.frame_index.retain(|_, (owner, _)| *owner != thread_id);
        if self.selection.thread_id == Some(thread_id) {
            self.selection = Selection::default();
        }
        true
    }

    /// Returns `false` when the session had already terminated.
    pub(crate) fn on_terminated(&mut self) -> bool {
        if self.phase == SessionPhase::Terminated {
            return false;
        }
        self.phase = SessionPhase::Terminated;
        self.exited.extend(self.threads.keys().copied());
        self.threads.clear();
        self.frame_index.clear();
        self.selection = Selection::default();
        true
    }

    /// Adopt the adapter's thread list, keeping run state of known threads.
    pub(crate) fn merge_threads(&mut self, listed: Vec<protocol::Thread>) {
        let mut merged = IndexMap::with_capacity(listed.len());
        for raw in listed {
            let mut entry = self
                .threads
                .shift_remove(&raw.id)
                .unwrap_or_else(|| ThreadEntry::new(Thread::new(raw.id, String::new())));
            entry.thread.name = raw.name;
            self.exited.remove(&raw.id);
            merged.insert(raw.id, entry);
        }
        for (thread_id, stale) in self.threads.drain(..) {
            // A thread stopped by an event may be missing from a listing
            // that raced with the stop.
            if stale.generation().is_some() {
                merged.insert(thread_id, stale);
            }
        }
        self.threads = merged;
        if self
            .selection
            .thread_id
            .is_some_and(|thread_id| !self.threads.contains_key(&thread_id))
        {
            self.selection = Selection::default();
        }
        self.sync_selection_flags();
    }

    pub(crate) fn thread_state(&self, thread_id: i64) -> ThreadState {
        match self.threads.get(&thread_id) {
            Some(entry) => entry.state,
            None => ThreadState::Terminated,
        }
    }

    pub(crate) fn stopped_generation(&self, thread_id: i64) -> Option<Generation> {
        self.threads.get(&thread_id).and_then(ThreadEntry::generation)
    }

    pub(crate) fn live_generations(&self) -> FxHashSet<Generation> {
        self.threads
            .values()
            .filter_map(ThreadEntry::generation)
            .collect()
    }

    pub(crate) fn latest_live_generation(&self) -> Option<Generation> {
        self.live_generations().into_iter().max()
    }

    pub(crate) fn threads(&self) -> Vec<Thread> {
        self.threads
            .values()
            .map(|entry| entry.thread.clone())
            .collect()
    }

    pub(crate) fn first_stopped_thread(&self) -> Option<i64> {
        self.threads
            .iter()
            .find(|(_, entry)| entry.generation().is_some())
            .map(|(thread_id, _)| *thread_id)
    }

    pub(crate) fn frames(&self, thread_id: i64, generation: Generation) -> Option<Arc<[StackFrame]>> {
        let entry = self.threads.get(&thread_id)?;
        if entry.generation() != Some(generation) {
            return None;
        }
        entry.frames.clone()
    }

    /// Cache frames fetched during `generation`. Returns `false` when the
    /// thread has moved on.
    pub(crate) fn store_frames(
        &mut self,
        thread_id: i64,
        generation: Generation,
        frames: Arc<[StackFrame]>,
    ) -> bool {
        let Some(entry) = self.threads.get_mut(&thread_id) else {
            return false;
        };
        if entry.generation() != Some(generation) {
            return false;
        }
        for frame in frames.iter() {
            self.frame_index.insert(frame.id, (thread_id, generation));
        }
        entry.frames = Some(frames);
        true
    }

    /// Owning thread and generation of a frame id from the current stops.
    pub(crate) fn frame_owner(&self, frame_id: i64) -> Option<(i64, Generation)> {
        let (thread_id, generation) = *self.frame_index.get(&frame_id)?;
        (self.stopped_generation(thread_id) == Some(generation)).then_some((thread_id, generation))
    }

    pub(crate) fn selected_thread(&self) -> Option<i64> {
        self.selection.thread_id
    }

    pub(crate) fn selected_frame_id(&self) -> Option<i64> {
        self.selection.frame_id
    }

    pub(crate) fn select(&mut self, thread_id: Option<i64>, frame_id: Option<i64>) {
        self.selection = Selection {
            thread_id,
            frame_id,
        };
        self.sync_selection_flags();
    }

    pub(crate) fn contains_thread(&self, thread_id: i64) -> bool {
        self.threads.contains_key(&thread_id)
    }

    /// Flip a thread's UI expansion flag. `None` for unknown threads.
    pub(crate) fn toggle_expanded(&mut self, thread_id: i64) -> Option<bool> {
        let entry = self.threads.get_mut(&thread_id)?;
        entry.thread.expanded = !entry.thread.expanded;
        Some(entry.thread.expanded)
    }

    fn sync_selection_flags(&mut self) {
        let selected = self.selection.thread_id;
        for (thread_id, entry) in &mut self.threads {
            entry.thread.selected = selected == Some(*thread_id);
        }
    }
}
