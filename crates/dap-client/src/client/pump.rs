//! Transport tasks.
//! - spawn: start reader pump + writer under the client's dispatch
//! - read_loop: sole reader; decode and route each message in wire order
//! - write_loop: drain outgoing frames

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace, warn, Dispatch, Instrument};

use crate::codec::{decode, read_frame, write_frame, FrameError, Message};

use super::Shared;

const TRANSCRIPT_TARGET: &str = "dap_client::transcript";

pub(super) fn spawn<R, W>(
    shared: Arc<Shared>,
    reader: R,
    writer: W,
    outgoing: UnboundedReceiver<Vec<u8>>,
    dispatch: &Dispatch,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::dispatcher::with_default(dispatch, || tracing::info_span!("dap_client"));
    tokio::spawn(
        read_loop(Arc::clone(&shared), reader)
            .instrument(span.clone())
            .with_subscriber(dispatch.clone()),
    );
    tokio::spawn(
        write_loop(shared, writer, outgoing)
            .instrument(span)
            .with_subscriber(dispatch.clone()),
    );
}

async fn read_loop<R>(shared: Arc<Shared>, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("debug adapter closed the stream");
                break;
            }
            Err(FrameError::Protocol(err)) => {
                warn!(error = %err, "dropping unreadable frame");
                continue;
            }
            Err(FrameError::Io(err)) => {
                warn!(error = %err, "debug adapter transport failed");
                break;
            }
        };
        if shared.transcript {
            trace!(
                target: TRANSCRIPT_TARGET,
                direction = "<-",
                payload = %String::from_utf8_lossy(&payload)
            );
        }
        match decode(&payload) {
            Ok(message) => dispatch_message(&shared, message),
            Err(err) => warn!(error = %err, "dropping malformed message"),
        }
    }
    shared.shutdown();
}

fn dispatch_message(shared: &Shared, message: Message) {
    match message {
        Message::Response(response) => {
            trace!(
                request_seq = response.request_seq,
                command = %response.command,
                success = response.success,
                "response received"
            );
            shared.pending.complete(response);
        }
        Message::Event(event) => {
            trace!(event = %event.event, seq = event.seq, "event received");
            let observer = shared.observer.read().clone();
            if let Some(observer) = observer {
                observer.on_event(&event);
            }
            shared.subscribers.publish_event(&event);
        }
        Message::Request(request) => {
            debug!(command = %request.command, seq = request.seq, "reverse request received");
            if let Some(request) = shared.subscribers.publish_request(request) {
                warn!(command = %request.command, "no handler for reverse request");
                let message = format!("unsupported reverse request '{}'", request.command);
                match shared
                    .codec
                    .encode_response(request.seq, &request.command, Err(message))
                {
                    Ok(frame) => {
                        let _ = shared.outgoing.send(frame);
                    }
                    Err(err) => warn!(error = %err, "failed to encode reverse request reply"),
                }
            }
        }
    }
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut outgoing: UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    let mut closed = shared.closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = outgoing.recv() => frame,
            _ = closed.wait_for(|closed| *closed) => None,
        };
        let Some(frame) = frame else {
            break;
        };
        if shared.transcript {
            trace!(
                target: TRANSCRIPT_TARGET,
                direction = "->",
                payload = %String::from_utf8_lossy(&frame)
            );
        }
        if let Err(err) = write_frame(&mut writer, &frame).await {
            warn!(error = %err, "failed to write to debug adapter");
            shared.shutdown();
            break;
        }
    }
    let _ = writer.shutdown().await;
}
