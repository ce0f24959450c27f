//! Line-delimited JSON transport between the host runtime and the worker.
//!
//! Inbound, one frame per line:
//! - `{"id": …, "event": {…}}` dispatches a worker event
//! - `{"clients": [...]}` replaces the open-client registry
//!
//! Outbound, one frame per line:
//! - `{"id": …, "outcome": {…}}` or `{"id": …, "error": {"code", "message"}}`
//! - `{"command": {…}}` for display and window instructions
//!
//! Events are dispatched concurrently. At end of input the transport waits for
//! every reply and every keep-alive task before returning.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use waypost_client::{ClientWindow, KeepAlive};

use crate::error::{ErrorBody, TransportError};
use crate::handler::{Outcome, Worker, WorkerEvent};
use crate::host::{HostCommand, StdioHost};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Clients { clients: Vec<ClientWindow> },
    Event {
        #[serde(default)]
        id: Value,
        event: Value,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outbound<'a> {
    Reply { id: &'a Value, outcome: &'a Outcome },
    Failure { id: &'a Value, error: ErrorBody },
    Command { command: &'a HostCommand },
}

fn encode(frame: &Outbound<'_>) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            None
        }
    }
}

fn failure(id: &Value, err: &TransportError) -> Option<String> {
    encode(&Outbound::Failure { id, error: ErrorBody::from(err) })
}

/// Serve frames from `input` until it ends, writing replies and commands to `output`.
///
/// Returns `output` once everything has been flushed.
pub async fn serve<R, W>(
    worker: Worker, host: Arc<StdioHost>, mut commands: mpsc::UnboundedReceiver<HostCommand>, input: R, output: W,
) -> anyhow::Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (replies, mut reply_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        loop {
            let line = tokio::select! {
                biased;
                Some(command) = commands.recv() => encode(&Outbound::Command { command: &command }),
                reply = reply_rx.recv() => match reply {
                    Some(line) => Some(line),
                    None => break,
                },
            };
            if let Some(line) = line {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }
        while let Ok(command) = commands.try_recv() {
            if let Some(line) = encode(&Outbound::Command { command: &command }) {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
        }
        output.flush().await?;
        Ok::<W, std::io::Error>(output)
    });

    let in_flight = KeepAlive::new();
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let (id, event) = match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Clients { clients }) => {
                host.set_clients(clients);
                continue;
            }
            Ok(Frame::Event { id, event }) => match serde_json::from_value::<WorkerEvent>(event) {
                Ok(event) => (id, event),
                Err(e) => {
                    tracing::warn!(error = %e, "rejecting unknown event");
                    if let Some(line) = failure(&id, &e.into()) {
                        let _ = replies.send(line);
                    }
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed frame");
                if let Some(line) = failure(&Value::Null, &e.into()) {
                    let _ = replies.send(line);
                }
                continue;
            }
        };

        let worker = worker.clone();
        let replies = replies.clone();
        in_flight.extend(async move {
            match worker.dispatch(event).await {
                Ok(dispatched) => {
                    if let Some(line) = encode(&Outbound::Reply { id: &id, outcome: &dispatched.outcome }) {
                        let _ = replies.send(line);
                    }
                    dispatched.keep_alive.settled().await;
                }
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "event failed");
                    if let Some(line) = failure(&id, &TransportError::Worker(e)) {
                        let _ = replies.send(line);
                    }
                }
            }
        });
    }

    tracing::info!(pending = in_flight.pending(), "input closed, settling outstanding work");
    in_flight.settled().await;
    drop(replies);

    let output = writer.await??;
    Ok(output)
}
