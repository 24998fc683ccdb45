//! Session event observer.
//! - on_event: stopped/continued/thread/terminated/exited/output transitions
//! - on_disconnected: terminate on transport loss

use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::client::EventObserver;
use crate::error::ProtocolError;
use crate::protocol::{
    ContinuedEventBody, Event, ExitedEventBody, OutputEventBody, StoppedEventBody,
    TerminatedEventBody, ThreadEventBody,
};

use super::{OutputNotification, SessionShared, StoppedNotification, TerminationCause};

/// Holds the session weakly; the client owns the observer and the session
/// owns the client.
pub(super) struct SessionObserver {
    shared: Weak<SessionShared>,
}

impl SessionObserver {
    pub(super) fn new(shared: &Arc<SessionShared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }
}

fn event_body<T: DeserializeOwned>(event: &Event<Value>) -> Result<T, ProtocolError> {
    let body = event
        .body
        .clone()
        .unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value(body).map_err(|err| ProtocolError::invalid_body(event.event.as_str(), &err))
}

impl EventObserver for SessionObserver {
    fn on_event(&self, event: &Event<Value>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let outcome = match event.event.as_str() {
            "stopped" => event_body::<StoppedEventBody>(event).map(|body| shared.stopped(&body)),
            "continued" => event_body::<ContinuedEventBody>(event).map(|body| shared.continued(&body)),
            "thread" => event_body::<ThreadEventBody>(event).map(|body| shared.thread(&body)),
            "terminated" => {
                let body = event_body::<TerminatedEventBody>(event);
                if let Ok(TerminatedEventBody {
                    restart: Some(restart),
                }) = &body
                {
                    debug!(?restart, "adapter asked for a restart; not supported");
                }
                shared.terminate(TerminationCause::Terminated);
                body.map(drop)
            }
            "exited" => event_body::<ExitedEventBody>(event)
                .map(|body| shared.terminate(TerminationCause::Exited(body.exit_code))),
            "output" => event_body::<OutputEventBody>(event).map(|body| shared.output(body)),
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(event = %event.event, error = %err, "ignoring malformed event");
        }
    }

    fn on_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.terminate(TerminationCause::Disconnected);
        }
    }
}

impl SessionShared {
    fn stopped(&self, body: &StoppedEventBody) {
        let Some(stop) = self.transition(|state| state.on_stopped(body)) else {
            return;
        };
        info!(
            reason = %body.reason,
            thread_id = ?body.thread_id,
            generation = %stop.generation,
            "debuggee stopped"
        );
        let _ = self.notifier.stopped.send(StoppedNotification {
            reason: body.reason.clone(),
            description: body.description.clone(),
            thread_id: body.thread_id,
            thread_ids: stop.thread_ids,
            generation: stop.generation,
        });
    }

    fn continued(&self, body: &ContinuedEventBody) {
        let all = body.all_threads_continued.unwrap_or(false);
        let resumed = self.transition(|state| state.on_continued(body.thread_id, all));
        debug!(thread_id = body.thread_id, all, resumed = resumed.len(), "debuggee continued");
        self.notifier.continued(resumed);
    }

    fn thread(&self, body: &ThreadEventBody) {
        match body.reason.as_str() {
            "started" => {
                debug!(thread_id = body.thread_id, "thread started");
                self.transition(|state| state.on_thread_started(body.thread_id));
            }
            "exited" => {
                if self.transition(|state| state.on_thread_exited(body.thread_id)) {
                    debug!(thread_id = body.thread_id, "thread exited");
                }
            }
            other => debug!(thread_id = body.thread_id, reason = other, "unhandled thread event"),
        }
    }

    pub(super) fn terminate(&self, cause: TerminationCause) {
        if self.transition(super::state::SessionState::on_terminated) {
            info!(?cause, "debug session terminated");
            let _ = self.notifier.terminated.send(cause);
        }
    }

    fn output(&self, body: OutputEventBody) {
        let _ = self.notifier.output.send(OutputNotification {
            category: body.category,
            output: body.output,
        });
    }
}
