//! DAP message codec.
//! - MessageCodec: sequence numbers + request/response encoding
//! - decode: classify a payload as request, response or event
//! - read_frame/write_frame: `Content-Length` framing over async IO

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::protocol::{Event, MessageType, Request, Response};

const CONTENT_LENGTH: &str = "Content-Length";

/// A decoded message received from the adapter.
#[derive(Debug, Clone)]
pub enum Message {
    /// Reverse request issued by the adapter (e.g. `runInTerminal`).
    Request(Request<Value>),
    Response(Response<Value>),
    Event(Event<Value>),
}

impl Message {
    #[must_use]
    pub fn seq(&self) -> u32 {
        match self {
            Self::Request(request) => request.seq,
            Self::Response(response) => response.seq,
            Self::Event(event) => event.seq,
        }
    }
}

/// Encodes outgoing messages with a monotonically increasing `seq`.
#[derive(Debug)]
pub struct MessageCodec {
    next_seq: AtomicU32,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU32::new(1),
        }
    }

    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Encode a request into a complete frame and return its sequence number.
    pub fn encode_request<A: Serialize>(
        &self,
        command: &str,
        arguments: Option<A>,
    ) -> Result<(u32, Vec<u8>), ProtocolError> {
        let arguments = arguments
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| ProtocolError::invalid_body(command, &err))?;
        let seq = self.next_seq();
        let request = Request {
            seq,
            message_type: MessageType::Request,
            command: command.to_string(),
            arguments,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|err| ProtocolError::invalid_body(command, &err))?;
        Ok((seq, frame(&payload)))
    }

    /// Encode a reply to a reverse request. `Err` carries the failure message.
    pub fn encode_response(
        &self,
        request_seq: u32,
        command: &str,
        outcome: Result<Option<Value>, String>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let (success, body, message) = match outcome {
            Ok(body) => (true, body, None),
            Err(message) => (false, None, Some(message)),
        };
        let response = Response {
            seq: self.next_seq(),
            message_type: MessageType::Response,
            request_seq,
            success,
            command: command.to_string(),
            message,
            body,
        };
        let payload = serde_json::to_vec(&response)
            .map_err(|err| ProtocolError::invalid_body(command, &err))?;
        Ok(frame(&payload))
    }
}

/// Wrap a payload in a `Content-Length` header.
#[must_use]
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut bytes = Vec::with_capacity(header.len() + payload.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Classify a JSON payload into a [`Message`].
pub fn decode(payload: &[u8]) -> Result<Message, ProtocolError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|err| ProtocolError::MalformedJson(err.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::MalformedJson(
            "expected a JSON object".to_string(),
        ));
    };
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField {
            kind: "message",
            field: "type",
        })?;
    match kind {
        "response" => {
            require(object, "response", "seq")?;
            require(object, "response", "success")?;
            require(object, "response", "command")?;
            if !object.contains_key("request_seq") && !object.contains_key("requestSeq") {
                return Err(ProtocolError::MissingField {
                    kind: "response",
                    field: "request_seq",
                });
            }
            serde_json::from_value(value)
                .map(Message::Response)
                .map_err(|err| ProtocolError::invalid_body("response", &err))
        }
        "event" => {
            require(object, "event", "seq")?;
            require(object, "event", "event")?;
            serde_json::from_value(value)
                .map(Message::Event)
                .map_err(|err| ProtocolError::invalid_body("event", &err))
        }
        "request" => {
            require(object, "request", "seq")?;
            require(object, "request", "command")?;
            serde_json::from_value(value)
                .map(Message::Request)
                .map_err(|err| ProtocolError::invalid_body("request", &err))
        }
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn require(
    object: &Map<String, Value>,
    kind: &'static str,
    field: &'static str,
) -> Result<(), ProtocolError> {
    match object.get(field) {
        Some(value) if !value.is_null() => Ok(()),
        _ => Err(ProtocolError::MissingField { kind, field }),
    }
}

/// Failure while reading one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The byte stream failed; the connection is unusable.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The header block was unusable; the stream may still recover.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Read one framed payload. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut invalid_length = None;
    let mut undecodable = None;
    let mut saw_header = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes = reader.read_until(b'\n', &mut line).await?;
        if bytes == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )
                .into());
            }
            return Ok(None);
        }
        let Ok(text) = std::str::from_utf8(&line) else {
            saw_header = true;
            undecodable.get_or_insert_with(|| {
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string()
            });
            continue;
        };
        let trimmed = text.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                match value.trim().parse::<usize>() {
                    Ok(length) => content_length = Some(length),
                    Err(_) => invalid_length = Some(value.trim().to_string()),
                }
            }
        }
    }

    let length = match (content_length, invalid_length) {
        (Some(length), _) => length,
        (None, Some(raw)) => return Err(ProtocolError::InvalidContentLength(raw).into()),
        (None, None) => {
            return Err(undecodable
                .map_or(ProtocolError::MissingContentLength, ProtocolError::InvalidHeader)
                .into())
        }
    };

    // Grow with the bytes actually received rather than the declared length.
    let mut buffer = Vec::new();
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut buffer)
        .await?;
    if buffer.len() < length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside a frame body",
        )
        .into());
    }
    // The body was consumed, so the next frame starts cleanly.
    if let Some(raw) = undecodable {
        return Err(ProtocolError::InvalidHeader(raw).into());
    }
    Ok(Some(buffer))
}

/// Write an already framed message and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
