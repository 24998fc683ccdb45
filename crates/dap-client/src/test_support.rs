//! Test helpers: in-memory debug adapters over `tokio::io::duplex`.
//! - ManualAdapter: test drives every frame by hand
//! - ScriptedAdapter: canned replies per command, call counting, event injection
//! - stopped_session: a started session with thread 1 stopped

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::client::{ClientOptions, DapClient};
use crate::codec::{decode, frame, read_frame, write_frame, Message};
use crate::config::LaunchConfiguration;
use crate::protocol::{Event, MessageType, Request, Response};
use crate::session::DebugSession;

const DUPLEX_CAPACITY: usize = 64 * 1024;

fn duplex_pair() -> (
    (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>),
    (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>),
) {
    let (client_side, adapter_side) = tokio::io::duplex(DUPLEX_CAPACITY);
    (
        tokio::io::split(client_side),
        tokio::io::split(adapter_side),
    )
}

fn response_frame(seq: u32, request: &Request<Value>, outcome: Result<Value, String>) -> Vec<u8> {
    let (success, body, message) = match outcome {
        Ok(body) => (true, Some(body), None),
        Err(message) => (false, None, Some(message)),
    };
    let response = Response {
        seq,
        message_type: MessageType::Response,
        request_seq: request.seq,
        success,
        command: request.command.clone(),
        message,
        body,
    };
    frame(&serde_json::to_vec(&response).expect("serialize response"))
}

fn event_frame(seq: u32, event: &str, body: Value) -> Vec<u8> {
    let event = Event {
        seq,
        message_type: MessageType::Event,
        event: event.to_string(),
        body: Some(body),
    };
    frame(&serde_json::to_vec(&event).expect("serialize event"))
}

/// Adapter side of a connection driven step by step from the test.
pub(crate) struct ManualAdapter {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    seq: u32,
}

pub(crate) fn manual_pair() -> (DapClient, ManualAdapter) {
    let ((client_read, client_write), (adapter_read, adapter_write)) = duplex_pair();
    let client = DapClient::connect(client_read, client_write, ClientOptions::default());
    let adapter = ManualAdapter {
        reader: BufReader::new(adapter_read),
        writer: adapter_write,
        seq: 0,
    };
    (client, adapter)
}

impl ManualAdapter {
    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    pub(crate) async fn next_message(&mut self) -> Message {
        let payload = read_frame(&mut self.reader)
            .await
            .expect("read frame")
            .expect("client closed the stream");
        decode(&payload).expect("decode client message")
    }

    pub(crate) async fn next_request(&mut self) -> Request<Value> {
        match self.next_message().await {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    pub(crate) async fn respond(&mut self, request: &Request<Value>, body: Value) {
        let seq = self.next_seq();
        self.send_raw(&response_frame(seq, request, Ok(body))).await;
    }

    pub(crate) async fn fail(&mut self, request: &Request<Value>, message: &str) {
        let seq = self.next_seq();
        self.send_raw(&response_frame(seq, request, Err(message.to_string())))
            .await;
    }

    pub(crate) async fn event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        self.send_raw(&event_frame(seq, event, body)).await;
    }

    pub(crate) async fn reverse_request(&mut self, command: &str, arguments: Value) -> u32 {
        let seq = self.next_seq();
        let request = Request {
            seq,
            message_type: MessageType::Request,
            command: command.to_string(),
            arguments: Some(arguments),
        };
        self.send_raw(&frame(&serde_json::to_vec(&request).expect("serialize request")))
            .await;
        seq
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        write_frame(&mut self.writer, bytes)
            .await
            .expect("write to client");
    }
}

/// Canned adapter reply: a result plus events emitted right after it.
pub(crate) struct Reply {
    outcome: Result<Value, String>,
    events: Vec<(String, Value)>,
}

impl Reply {
    pub(crate) fn ok(body: Value) -> Self {
        Self {
            outcome: Ok(body),
            events: Vec::new(),
        }
    }

    pub(crate) fn err(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            events: Vec::new(),
        }
    }

    pub(crate) fn then_event(mut self, event: &str, body: Value) -> Self {
        self.events.push((event.to_string(), body));
        self
    }
}

type Handler = Box<dyn Fn(&Value) -> Reply + Send + Sync>;

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Adapter that answers from per-command handlers on its own task.
#[derive(Default)]
pub(crate) struct ScriptedAdapter {
    handlers: FxHashMap<String, Handler>,
    delays: FxHashMap<String, Duration>,
}

/// Test-side handle to a running [`ScriptedAdapter`].
#[derive(Clone)]
pub(crate) struct AdapterHandle {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    outgoing: UnboundedSender<Outgoing>,
    seq: Arc<AtomicU32>,
}

impl ScriptedAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on<F>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        self.handlers.insert(command.to_string(), Box::new(handler));
        self
    }

    /// Delay every reply to `command`.
    pub(crate) fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    pub(crate) fn spawn(self) -> (DapClient, AdapterHandle) {
        let ((client_read, client_write), (adapter_read, mut adapter_write)) = duplex_pair();
        let client = DapClient::connect(client_read, client_write, ClientOptions::default());

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();
        let handle = AdapterHandle {
            calls: Arc::new(Mutex::new(Vec::new())),
            outgoing,
            seq: Arc::new(AtomicU32::new(1)),
        };

        tokio::spawn(async move {
            while let Some(outgoing) = outgoing_rx.recv().await {
                match outgoing {
                    Outgoing::Frame(bytes) => {
                        if write_frame(&mut adapter_write, &bytes).await.is_err() {
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = adapter_write.shutdown().await;
                        break;
                    }
                }
            }
        });

        let task_handle = handle.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(adapter_read);
            while let Ok(Some(payload)) = read_frame(&mut reader).await {
                let Ok(Message::Request(request)) = decode(&payload) else {
                    continue;
                };
                let arguments = request.arguments.clone().unwrap_or(Value::Null);
                task_handle
                    .calls
                    .lock()
                    .push((request.command.clone(), arguments.clone()));
                let reply = match self.handlers.get(&request.command) {
                    Some(handler) => handler(&arguments),
                    None => Reply::err("unsupported command"),
                };
                let delay = self.delays.get(&request.command).copied();
                let responder = task_handle.clone();
                let send = move || {
                    let seq = responder.next_seq();
                    responder.push(response_frame(seq, &request, reply.outcome));
                    for (event, body) in reply.events {
                        responder.emit(&event, body);
                    }
                };
                match delay {
                    Some(delay) => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            send();
                        });
                    }
                    None => send(),
                }
            }
        });

        (client, handle)
    }
}

impl AdapterHandle {
    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, bytes: Vec<u8>) {
        let _ = self.outgoing.send(Outgoing::Frame(bytes));
    }

    /// Emit an event from the adapter.
    pub(crate) fn emit(&self, event: &str, body: Value) {
        let seq = self.next_seq();
        self.push(event_frame(seq, event, body));
    }

    /// Close the adapter's write half; the client sees end of stream.
    pub(crate) fn disconnect(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }

    /// Number of requests received for `command`.
    pub(crate) fn calls(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == command)
            .count()
    }

    /// Every command received, in arrival order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Arguments of every request received for `command`, in arrival order.
    pub(crate) fn arguments(&self, command: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, arguments)| arguments.clone())
            .collect()
    }
}

/// Handlers shared by session tests: one thread, two frames, one scope tree.
pub(crate) fn debuggee_adapter() -> ScriptedAdapter {
    ScriptedAdapter::new()
        .on("initialize", |_| {
            Reply::ok(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsEvaluateForHovers": true,
                "supportsSetVariable": true,
                "supportsCompletionsRequest": true
            }))
            .then_event("initialized", json!({}))
        })
        .on("launch", |_| Reply::ok(json!({})))
        .on("attach", |_| Reply::ok(json!({})))
        .on("configurationDone", |_| Reply::ok(json!({})))
        .on("threads", |_| {
            Reply::ok(json!({"threads": [
                {"id": 1, "name": "main"},
                {"id": 2, "name": "worker"}
            ]}))
        })
        .on("stackTrace", |_| {
            Reply::ok(json!({"stackFrames": [
                {"id": 100, "name": "compute", "source": {"path": "/src/app.py"}, "line": 12, "column": 1},
                {"id": 101, "name": "<module>", "source": {"name": "frozen"}, "line": 3, "column": 1, "presentationHint": "subtle"}
            ], "totalFrames": 2}))
        })
        .on("scopes", |_| {
            Reply::ok(json!({"scopes": [
                {"name": "Locals", "variablesReference": 10, "expensive": false},
                {"name": "Globals", "variablesReference": 11, "expensive": true}
            ]}))
        })
        .on("variables", |arguments| {
            match arguments["variablesReference"].as_i64() {
                Some(10) => Reply::ok(json!({"variables": [
                    {"name": "point", "value": "Point(x=1, y=2)", "variablesReference": 20},
                    {"name": "count", "value": "3", "variablesReference": 0}
                ]})),
                Some(20) => Reply::ok(json!({"variables": [
                    {"name": "x", "value": "1"},
                    {"name": "y", "value": "2"}
                ]})),
                _ => Reply::err("invalid variablesReference"),
            }
        })
        .on("continue", |_| Reply::ok(json!({"allThreadsContinued": false})))
        .on("next", |_| Reply::ok(json!({})))
        .on("stepIn", |_| Reply::ok(json!({})))
        .on("stepOut", |_| Reply::ok(json!({})))
        .on("pause", |_| Reply::ok(json!({})))
        .on("disconnect", |_| Reply::ok(json!({})))
}

pub(crate) fn launch_configuration() -> LaunchConfiguration {
    LaunchConfiguration::from_json(
        &json!({"name": "app", "type": "python", "request": "launch", "program": "/src/app.py"}),
        0,
    )
    .expect("launch configuration")
}

/// Start a session against `adapter` and stop thread 1 once.
pub(crate) async fn stopped_session(adapter: ScriptedAdapter) -> (DebugSession, AdapterHandle) {
    let (client, handle) = adapter.spawn();
    let session = DebugSession::new(client);
    session
        .start(&launch_configuration())
        .await
        .expect("start session");
    let mut stopped = session.on_stopped();
    handle.emit(
        "stopped",
        json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": false}),
    );
    stopped.recv().await.expect("stopped notification");
    (session, handle)
}

/// Yield until the client's pump has had a chance to process queued frames.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}
