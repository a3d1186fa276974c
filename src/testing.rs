//! Scripted in-memory backend for unit tests.
//!
//! [`FakeBackend`] speaks the wire format over a `tokio::io::duplex` pipe and
//! answers each request according to a per-command script. Unscripted
//! commands succeed with an empty body. Responses echo the request's `seq`
//! as `request_seq`.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

use crate::config::SessionSettings;
use crate::dap::{Request, read_message, write_message};
use crate::error::{BridgeError, BridgeResult};
use crate::session::{BackendConnection, Connector, SessionHandle};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum Reply {
    Respond(Value),
    Fail {
        message: String,
        error: Option<(i64, String)>,
    },
    /// Never answer.
    Silent,
    /// Answer with a frame whose body is not JSON.
    Garbage,
    /// Close the backend's write side instead of answering.
    HangUp,
}

#[derive(Debug, Clone, Default)]
struct CommandScript {
    replies: VecDeque<Reply>,
    events: Vec<(String, Value)>,
    delay: Option<Duration>,
}

impl CommandScript {
    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&mut self) -> Reply {
        if self.replies.len() > 1
            && let Some(reply) = self.replies.pop_front()
        {
            return reply;
        }
        self.replies
            .front()
            .cloned()
            .unwrap_or_else(|| Reply::Respond(json!({})))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    scripts: HashMap<String, CommandScript>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&mut self, command: &str) -> &mut CommandScript {
        self.scripts.entry(command.to_string()).or_default()
    }

    pub(crate) fn respond(mut self, command: &str, body: Value) -> Self {
        self.script(command).replies.push_back(Reply::Respond(body));
        self
    }

    /// Answer with `success: false`. With `error`, the body carries
    /// `{"error": {"id", "format"}}`.
    pub(crate) fn fail(mut self, command: &str, message: &str, error: Option<(i64, &str)>) -> Self {
        self.script(command).replies.push_back(Reply::Fail {
            message: message.to_string(),
            error: error.map(|(id, format)| (id, format.to_string())),
        });
        self
    }

    pub(crate) fn silent_on(mut self, command: &str) -> Self {
        self.script(command).replies.push_back(Reply::Silent);
        self
    }

    pub(crate) fn garbage_for(mut self, command: &str) -> Self {
        self.script(command).replies.push_back(Reply::Garbage);
        self
    }

    pub(crate) fn hang_up_on(mut self, command: &str) -> Self {
        self.script(command).replies.push_back(Reply::HangUp);
        self
    }

    /// Emit an event before every reply to `command`.
    pub(crate) fn event_before(mut self, command: &str, event: &str, body: Value) -> Self {
        self.script(command)
            .events
            .push((event.to_string(), body));
        self
    }

    /// Wait before answering `command`.
    pub(crate) fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.script(command).delay = Some(delay);
        self
    }

    /// Start the backend tasks and return the client side of the pipe.
    pub(crate) fn spawn(self) -> (BackendConnection, FakeBackendHandle) {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let handle = FakeBackendHandle::default();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let observed = handle.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(server_read);
            while let Ok(Some(message)) = read_message(&mut reader).await {
                let Ok(request) = serde_json::from_value::<Request>(message) else {
                    continue;
                };
                observed.record(&request);
                if request_tx.send(request).is_err() {
                    break;
                }
            }
        });

        let observed = handle.clone();
        tokio::spawn(respond_loop(self.scripts, request_rx, server_write, observed));

        let connection = BackendConnection::new(Box::new(client_read), Box::new(client_write));
        (connection, handle)
    }
}

async fn respond_loop(
    mut scripts: HashMap<String, CommandScript>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut writer: WriteHalf<DuplexStream>,
    observed: FakeBackendHandle,
) {
    let mut next_seq = 1000;

    while let Some(request) = requests.recv().await {
        let script = scripts.entry(request.command.clone()).or_default();
        let reply = script.next_reply();
        let events = script.events.clone();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        let mut outcome: io::Result<()> = Ok(());
        for (event, body) in events {
            next_seq += 1;
            let message = json!({"seq": next_seq, "type": "event", "event": event, "body": body});
            outcome = outcome.and(write_message(&mut writer, &message).await);
        }
        if outcome.is_err() {
            break;
        }

        next_seq += 1;
        let mut response = json!({
            "seq": next_seq,
            "type": "response",
            "request_seq": request.seq,
            "command": request.command,
            "success": true,
        });

        let written = match reply {
            Reply::Respond(body) => {
                observed.answered();
                response["body"] = body;
                write_message(&mut writer, &response).await
            }
            Reply::Fail { message, error } => {
                observed.answered();
                response["success"] = json!(false);
                response["message"] = json!(message);
                if let Some((id, format)) = error {
                    response["body"] = json!({"error": {"id": id, "format": format}});
                }
                write_message(&mut writer, &response).await
            }
            Reply::Silent => Ok(()),
            Reply::Garbage => {
                observed.answered();
                let body = b"{not json";
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                let mut frame = header.into_bytes();
                frame.extend_from_slice(body);
                writer.write_all(&frame).await
            }
            Reply::HangUp => {
                let _ = writer.shutdown().await;
                return;
            }
        };
        if written.is_err() {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[derive(Debug, Default)]
struct Observed {
    requests: Vec<Request>,
    outstanding: usize,
    max_outstanding: usize,
}

/// What a running [`FakeBackend`] has seen.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackendHandle {
    observed: Arc<Mutex<Observed>>,
}

impl FakeBackendHandle {
    fn record(&self, request: &Request) {
        let mut observed = self.observed.lock().unwrap();
        observed.requests.push(request.clone());
        observed.outstanding += 1;
        observed.max_outstanding = observed.max_outstanding.max(observed.outstanding);
    }

    fn answered(&self) {
        let mut observed = self.observed.lock().unwrap();
        observed.outstanding = observed.outstanding.saturating_sub(1);
    }

    /// Requests received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<Request> {
        self.observed.lock().unwrap().requests.clone()
    }

    /// Largest number of requests that were unanswered at the same time.
    pub(crate) fn max_outstanding(&self) -> usize {
        self.observed.lock().unwrap().max_outstanding
    }
}

/// Spawn a session actor over a fake backend.
pub(crate) fn fake_session(backend: FakeBackend) -> (SessionHandle, FakeBackendHandle) {
    let (connection, handle) = backend.spawn();
    let session = SessionHandle::spawn("session-test", connection, &SessionSettings::default());
    (session, handle)
}

/// Connector that hands out a fresh [`FakeBackend`] per session.
#[derive(Debug, Default)]
pub(crate) struct FakeConnector {
    backend: Option<FakeBackend>,
    backends: Mutex<Vec<FakeBackendHandle>>,
}

impl FakeConnector {
    pub(crate) fn new(backend: FakeBackend) -> Self {
        Self {
            backend: Some(backend),
            backends: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose backend never starts.
    pub(crate) fn failing() -> Self {
        Self::default()
    }

    pub(crate) fn backends(&self) -> Vec<FakeBackendHandle> {
        self.backends.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    async fn connect(&self) -> BridgeResult<BackendConnection> {
        let Some(backend) = self.backend.clone() else {
            return Err(BridgeError::Spawn {
                command: "fake-dlv".to_string(),
                source: io::Error::other("spawn refused"),
            });
        };
        let (connection, handle) = backend.spawn();
        self.backends.lock().unwrap().push(handle);
        Ok(connection)
    }
}
