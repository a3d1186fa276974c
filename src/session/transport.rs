//! Read loop over the backend connection.
//!
//! One background task per session decodes frames from the connection and
//! routes them into three bounded channels: responses, events and errors.
//! The task is the only producer on those channels.
//!
//! The loop ends when:
//! - the stream reaches a clean end (silently),
//! - a frame fails to decode (the error is pushed first),
//! - the cancellation token fires,
//! - the consuming side has gone away.
//!
//! Every channel send races the cancellation token so a full channel never
//! blocks shutdown.

use std::io;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dap::{Event, IncomingMessage, Response, read_message};

/// Read half of a backend connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a backend connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Consumer side of the read loop's channels.
pub(crate) struct Inbound {
    pub(crate) responses: mpsc::Receiver<Response>,
    pub(crate) events: mpsc::Receiver<Event>,
    pub(crate) errors: mpsc::Receiver<io::Error>,
}

/// Handle to a running read loop.
///
/// Dropping the handle cancels the loop.
pub(crate) struct ReadLoopHandle {
    join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ReadLoopHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub(crate) async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Err(e) = (&mut self.join_handle).await {
            warn!(
                target: "dap_bridge::transport",
                "Read loop task failed: {}",
                e
            );
        }
    }
}

impl Drop for ReadLoopHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn the read loop for one session.
///
/// `capacity` bounds each of the three channels and must be at least 1.
pub(crate) fn spawn_read_loop(
    session_id: String,
    reader: BoxedReader,
    capacity: usize,
) -> (ReadLoopHandle, Inbound) {
    let (response_tx, responses) = mpsc::channel(capacity);
    let (event_tx, events) = mpsc::channel(capacity);
    let (error_tx, errors) = mpsc::channel(capacity);

    let cancel_token = CancellationToken::new();
    let outbound = Outbound {
        responses: response_tx,
        events: event_tx,
        errors: error_tx,
    };
    let join_handle = tokio::spawn(read_loop(
        session_id,
        BufReader::new(reader),
        outbound,
        cancel_token.clone(),
    ));

    (
        ReadLoopHandle {
            join_handle,
            cancel_token,
        },
        Inbound {
            responses,
            events,
            errors,
        },
    )
}

struct Outbound {
    responses: mpsc::Sender<Response>,
    events: mpsc::Sender<Event>,
    errors: mpsc::Sender<io::Error>,
}

async fn read_loop(
    session_id: String,
    mut reader: BufReader<BoxedReader>,
    outbound: Outbound,
    cancel_token: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!(
                    target: "dap_bridge::transport",
                    "[{}] Read loop cancelled, shutting down",
                    session_id
                );
                break;
            }
            result = read_message(&mut reader) => result,
        };

        let delivered = match result {
            Ok(None) => {
                debug!(
                    target: "dap_bridge::transport",
                    "[{}] Backend closed the connection",
                    session_id
                );
                break;
            }
            Err(e) => {
                warn!(
                    target: "dap_bridge::transport",
                    "[{}] Failed to decode message: {}",
                    session_id,
                    e
                );
                forward(&outbound.errors, e, &cancel_token).await;
                break;
            }
            Ok(Some(message)) => match IncomingMessage::classify(message) {
                IncomingMessage::Response(response) => {
                    forward(&outbound.responses, response, &cancel_token).await
                }
                IncomingMessage::Event(event) => {
                    forward(&outbound.events, event, &cancel_token).await
                }
                IncomingMessage::Other(message) => {
                    debug!(
                        target: "dap_bridge::transport",
                        "[{}] Dropping message that is neither response nor event: {}",
                        session_id,
                        message
                    );
                    true
                }
            },
        };

        if !delivered {
            break;
        }
    }
}

/// Push one item, giving up if the token fires or the receiver is gone.
async fn forward<T>(tx: &mpsc::Sender<T>, item: T, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => false,
        result = tx.send(item) => result.is_ok(),
    }
}
