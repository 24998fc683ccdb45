//! Debug session module map.
//! - DebugSession: lifecycle (start/disconnect) and shared state
//! - state: per-thread run-state machine, generations, selection
//! - observer: event transitions applied in wire order
//! - inspect: threads, stack traces, scopes, selection, variables
//! - run_control: continue/next/stepIn/stepOut/pause
//! - tests: session tests against a scripted adapter

mod inspect;
mod observer;
mod run_control;
mod state;


use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::client::{ClientOptions, DapClient};
use crate::config::LaunchConfiguration;
use crate::error::{DapError, DapResult};
use crate::protocol::{Capabilities, DisconnectArguments, InitializeArguments};
use crate::types::Generation;
use crate::variables::VariableTree;

use self::observer::SessionObserver;
use self::state::SessionState;

pub use self::state::{SessionPhase, ThreadState};

const CLIENT_ID: &str = "dap-client";
const NOTIFICATION_CAPACITY: usize = 64;

/// A thread (or all threads) stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedNotification {
    pub reason: String,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub thread_ids: Vec<i64>,
    pub generation: Generation,
}

/// Threads that left a stop, either by event or by run-control response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuedNotification {
    pub thread_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// `terminated` event.
    Terminated,
    /// `exited` event with the debuggee's exit code.
    Exited(i64),
    /// Transport closed.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNotification {
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug)]
struct Notifier {
    stopped: broadcast::Sender<StoppedNotification>,
    continued: broadcast::Sender<ContinuedNotification>,
    terminated: broadcast::Sender<TerminationCause>,
    output: broadcast::Sender<OutputNotification>,
}

impl Notifier {
    fn new() -> Self {
        Self {
            stopped: broadcast::channel(NOTIFICATION_CAPACITY).0,
            continued: broadcast::channel(NOTIFICATION_CAPACITY).0,
            terminated: broadcast::channel(NOTIFICATION_CAPACITY).0,
            output: broadcast::channel(NOTIFICATION_CAPACITY).0,
        }
    }

    // A send with no live receivers is not an error for notifications.
    fn continued(&self, thread_ids: Vec<i64>) {
        if !thread_ids.is_empty() {
            let _ = self.continued.send(ContinuedNotification { thread_ids });
        }
    }
}

#[derive(Debug)]
struct SessionShared {
    state: Mutex<SessionState>,
    tree: VariableTree,
    notifier: Notifier,
}

impl SessionShared {
    /// Apply a state transition and purge the variable tree under one lock.
    fn transition<T>(&self, apply: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.lock();
        let outcome = apply(&mut state);
        self.tree.purge(state.live_generations());
        outcome
    }
}

/// Client-side view of one debug session over one adapter connection.
#[derive(Debug, Clone)]
pub struct DebugSession {
    client: DapClient,
    shared: Arc<SessionShared>,
}

impl DebugSession {
    /// Wrap a connected client. Installs the session as the client's event observer.
    #[must_use]
    pub fn new(client: DapClient) -> Self {
        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState::default()),
            tree: VariableTree::new(client.clone()),
            notifier: Notifier::new(),
        });
        client.set_observer(Arc::new(SessionObserver::new(&shared)));
        Self { client, shared }
    }

    /// Connect a client over `reader`/`writer` and wrap it in a session.
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(DapClient::connect(reader, writer, options))
    }

    #[must_use]
    pub fn client(&self) -> &DapClient {
        &self.client
    }

    #[must_use]
    pub fn variables(&self) -> &VariableTree {
        &self.shared.tree
    }

    /// `initialize`, then `launch`/`attach` with the configuration's argument
    /// map, then `configurationDone` once the adapter sent `initialized`.
    pub async fn start(&self, configuration: &LaunchConfiguration) -> DapResult<Capabilities> {
        let mut initialized = self.client.subscribe("initialized");
        self.shared.state.lock().set_phase(SessionPhase::Initializing);

        let capabilities: Capabilities = self
            .client
            .request(
                "initialize",
                InitializeArguments {
                    client_id: Some(CLIENT_ID.to_string()),
                    client_name: Some(CLIENT_ID.to_string()),
                    adapter_id: configuration.adapter_type.clone(),
                    lines_start_at1: true,
                    columns_start_at1: true,
                    path_format: Some("path".to_string()),
                    supports_variable_type: Some(true),
                    supports_run_in_terminal_request: Some(false),
                },
            )
            .await?;
        debug!(?capabilities, "adapter initialized");
        self.shared
            .state
            .lock()
            .set_capabilities(capabilities.clone());

        let command = configuration.request.command();
        info!(
            command,
            name = %configuration.name,
            adapter = %configuration.adapter_type,
            "starting debug session"
        );
        let launch = self
            .client
            .send(command, Some(Value::Object(configuration.arguments.clone())));
        let configure = async {
            if initialized.recv().await.is_none() {
                return Err(DapError::Disconnected);
            }
            if capabilities.supports_configuration_done_request == Some(true) {
                self.client.send("configurationDone", None).await?;
            }
            Ok::<(), DapError>(())
        };
        tokio::try_join!(launch, configure)?;

        self.shared.state.lock().set_phase(SessionPhase::Running);
        Ok(capabilities)
    }

    /// End the session. The session is terminated locally even if the
    /// adapter fails the request.
    pub async fn disconnect(&self, terminate_debuggee: bool) -> DapResult<()> {
        let outcome: DapResult<Value> = self
            .client
            .request(
                "disconnect",
                DisconnectArguments {
                    restart: None,
                    terminate_debuggee: Some(terminate_debuggee),
                },
            )
            .await;
        self.shared.terminate(TerminationCause::Terminated);
        match outcome {
            Ok(_) | Err(DapError::Disconnected) => Ok(()),
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.state.lock().capabilities().clone()
    }

    /// Whether the adapter advertised `flag` in its `initialize` response.
    pub(crate) fn supports(&self, flag: impl FnOnce(&Capabilities) -> Option<bool>) -> bool {
        flag(self.shared.state.lock().capabilities()) == Some(true)
    }

    pub(crate) fn require(
        &self,
        command: &str,
        flag: impl FnOnce(&Capabilities) -> Option<bool>,
    ) -> DapResult<()> {
        if self.supports(flag) {
            Ok(())
        } else {
            Err(DapError::Unsupported {
                command: command.into(),
            })
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionPhase {
        self.shared.state.lock().phase()
    }

    #[must_use]
    pub fn thread_state(&self, thread_id: i64) -> ThreadState {
        self.shared.state.lock().thread_state(thread_id)
    }

    #[must_use]
    pub fn on_stopped(&self) -> broadcast::Receiver<StoppedNotification> {
        self.shared.notifier.stopped.subscribe()
    }

    #[must_use]
    pub fn on_continued(&self) -> broadcast::Receiver<ContinuedNotification> {
        self.shared.notifier.continued.subscribe()
    }

    #[must_use]
    pub fn on_terminated(&self) -> broadcast::Receiver<TerminationCause> {
        self.shared.notifier.terminated.subscribe()
    }

    #[must_use]
    pub fn on_output(&self) -> broadcast::Receiver<OutputNotification> {
        self.shared.notifier.output.subscribe()
    }
}
