//! Request/response correlator module map.
//! - DapClient: connect, send/request, subscriptions, reverse-request replies
//! - pending: seq -> waiter table
//! - subscribers: event and reverse-request fan out
//! - pump: transport reader/writer tasks
//! - tests: correlator tests against an in-memory adapter

mod pending;
mod pump;
mod subscribers;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, Dispatch};

use crate::codec::MessageCodec;
use crate::error::{DapError, DapResult, ProtocolError};
use crate::protocol::Event;

use self::pending::PendingRequests;
use self::subscribers::Subscribers;

pub use self::subscribers::{EventSubscription, RequestSubscription};

/// Synchronous observer invoked by the message pump for every event, before
/// subscribers. Implementations must not block.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event<Value>);
    fn on_disconnected(&self);
}

/// Construction options for [`DapClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Logging sink for the pump and writer tasks. Defaults to the dispatcher
    /// current at connect time.
    pub dispatch: Option<Dispatch>,
    /// Record every frame at `trace` level on `dap_client::transcript`.
    pub transcript: bool,
}

pub(crate) struct Shared {
    codec: MessageCodec,
    pending: PendingRequests,
    subscribers: Arc<Subscribers>,
    observer: RwLock<Option<Arc<dyn EventObserver>>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    closed: watch::Sender<bool>,
    transcript: bool,
}

impl Shared {
    /// Tear down after the transport closed. Idempotent.
    fn shutdown(&self) {
        if !self.pending.close() {
            return;
        }
        debug!("debug adapter connection closed");
        self.subscribers.close();
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_disconnected();
        }
        self.closed.send_replace(true);
    }
}

/// DAP client over a single duplex connection.
#[derive(Clone)]
pub struct DapClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapClient")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Removes the caller's pending entry if its wait is abandoned.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    seq: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.seq);
    }
}

impl DapClient {
    /// Start the message pump over `reader`/`writer`. Must run inside a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            codec: MessageCodec::new(),
            pending: PendingRequests::default(),
            subscribers: Arc::new(Subscribers::default()),
            observer: RwLock::new(None),
            outgoing,
            closed,
            transcript: options.transcript,
        });
        let dispatch = options
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(|dispatch| dispatch.clone()));
        pump::spawn(Arc::clone(&shared), reader, writer, outgoing_rx, &dispatch);
        Self { shared }
    }

    /// Install the synchronous event observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn EventObserver>) {
        *self.shared.observer.write() = Some(observer);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.pending.is_closed()
    }

    /// Resolves once the transport has closed.
    pub async fn closed(&self) {
        let mut receiver = self.shared.closed.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    /// Send a request and wait for its response body.
    ///
    /// Dropping the returned future abandons the wait only; the adapter still
    /// processes the request.
    pub async fn send(&self, command: &str, arguments: Option<Value>) -> DapResult<Option<Value>> {
        let (seq, frame) = self.shared.codec.encode_request(command, arguments)?;
        let receiver = self.shared.pending.register(seq, command)?;
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            seq,
        };
        if self.shared.outgoing.send(frame).is_err() {
            return Err(DapError::Disconnected);
        }
        debug!(seq, command, "request sent");
        receiver.await.unwrap_or(Err(DapError::Disconnected))
    }

    /// Typed wrapper over [`DapClient::send`]. A missing body decodes as `{}`.
    pub async fn request<A, B>(&self, command: &str, arguments: A) -> DapResult<B>
    where
        A: Serialize,
        B: DeserializeOwned,
    {
        let arguments = serde_json::to_value(arguments)
            .map_err(|err| ProtocolError::invalid_body(command, &err))?;
        let arguments = (!arguments.is_null()).then_some(arguments);
        let body = self
            .send(command, arguments)
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(body)
            .map_err(|err| DapError::from(ProtocolError::invalid_body(command, &err)))
    }

    /// Subscribe to one event by name.
    #[must_use]
    pub fn subscribe(&self, event: &str) -> EventSubscription {
        self.shared.subscribers.subscribe_event(event)
    }

    /// Subscribe to reverse requests. Each request goes to one subscriber,
    /// which must answer it with [`DapClient::respond`].
    #[must_use]
    pub fn reverse_requests(&self) -> RequestSubscription {
        self.shared.subscribers.subscribe_requests()
    }

    /// Answer a reverse request. `Err` carries the failure message.
    pub fn respond(
        &self,
        request_seq: u32,
        command: &str,
        outcome: Result<Option<Value>, String>,
    ) -> DapResult<()> {
        if self.is_closed() {
            return Err(DapError::Disconnected);
        }
        let frame = self
            .shared
            .codec
            .encode_response(request_seq, command, outcome)?;
        self.shared
            .outgoing
            .send(frame)
            .map_err(|_| DapError::Disconnected)
    }
}
