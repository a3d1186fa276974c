//! Session actor: one request in flight, events absorbed while waiting.
//!
//! Each session runs as a task that owns the connection's write half, the
//! read loop's channels and the backend process. Callers talk to it through
//! a cloneable [`SessionHandle`] whose mailbox carries a closed set of
//! [`SessionCommand`]s. Commands are served strictly in arrival order, so
//! at most one request is ever outstanding on the wire.
//!
//! Requests are stamped with a per-session sequence number. A response is
//! accepted only when its `request_seq` matches the outstanding request;
//! anything else is a leftover from an abandoned call and is discarded.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendConnection, BackendProcess};
use super::transport::{BoxedWriter, Inbound, ReadLoopHandle, spawn_read_loop};
use crate::config::SessionSettings;
use crate::dap::types::{ExitedEventBody, OutputEventBody, StoppedEventBody};
use crate::dap::{Event, Request, Response, write_message};
use crate::error::{BridgeError, BridgeResult};

const MAILBOX_CAPACITY: usize = 32;

/// Point in time after which a call gives up, optionally tied to a
/// cancellation token.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: Option<CancellationToken>,
}

/// Why a deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    Elapsed,
    Cancelled,
}

impl Expiry {
    pub(crate) fn into_error(self, command: &str) -> BridgeError {
        let command = command.to_string();
        match self {
            Expiry::Elapsed => BridgeError::DeadlineElapsed { command },
            Expiry::Cancelled => BridgeError::Cancelled { command },
        }
    }
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at, cancel: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// Also give up as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns the expiry if the deadline has already fired.
    pub(crate) fn expired(&self) -> Option<Expiry> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(Expiry::Cancelled);
        }
        if Instant::now() >= self.at {
            return Some(Expiry::Elapsed);
        }
        None
    }

    /// Completes when the deadline fires.
    pub(crate) async fn fired(&self) -> Expiry {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Expiry::Cancelled,
                _ = tokio::time::sleep_until(self.at) => Expiry::Elapsed,
            },
            None => {
                tokio::time::sleep_until(self.at).await;
                Expiry::Elapsed
            }
        }
    }
}

/// Messages accepted by a session actor.
pub(crate) enum SessionCommand {
    Call {
        request: Request,
        deadline: Deadline,
        reply: oneshot::Sender<BridgeResult<Response>>,
    },
    Stop {
        grace: Duration,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable reference to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    mailbox: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Start a session actor over an established backend connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: impl Into<String>,
        connection: BackendConnection,
        settings: &SessionSettings,
    ) -> Self {
        let id = id.into();
        let BackendConnection {
            reader,
            writer,
            process,
        } = connection;

        let (read_loop, inbound) =
            spawn_read_loop(id.clone(), reader, settings.channel_capacity.max(1));
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = SessionActor {
            id: id.clone(),
            mailbox: mailbox_rx,
            writer: Some(writer),
            inbound,
            read_loop: Some(read_loop),
            process,
            next_seq: 1,
            stop_grace: settings.stop_grace,
            kill_grace: settings.kill_grace,
            exit_timeout: settings.exit_timeout,
        };
        tokio::spawn(actor.run());

        debug!(target: "dap_bridge::session", "[{}] Session started", id);
        Self {
            id,
            mailbox: mailbox_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once the session has stopped accepting commands.
    pub fn is_stopped(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Send one request and wait for its response.
    ///
    /// Calls from several tasks are queued and served one at a time. The
    /// deadline covers both the time spent queued and the wait for the
    /// response. An already expired deadline fails without touching the
    /// connection.
    pub async fn call(&self, request: Request, deadline: Deadline) -> BridgeResult<Response> {
        let command = request.command.clone();
        if let Some(expiry) = deadline.expired() {
            return Err(expiry.into_error(&command));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let message = SessionCommand::Call {
            request,
            deadline: deadline.clone(),
            reply: reply_tx,
        };

        let send = self.mailbox.send(message);
        let queued = tokio::select! {
            biased;
            expiry = deadline.fired() => return Err(expiry.into_error(&command)),
            result = send => result,
        };
        if queued.is_err() {
            return Err(BridgeError::SessionStopped(self.id.clone()));
        }

        tokio::select! {
            biased;
            result = reply_rx => {
                result.unwrap_or_else(|_| Err(BridgeError::SessionStopped(self.id.clone())))
            }
            expiry = deadline.fired() => Err(expiry.into_error(&command)),
        }
    }

    /// Stop the session.
    ///
    /// Sends `disconnect` and waits for its response for at most `grace`,
    /// then closes the connection and terminates the backend process.
    /// Fails with `SessionStopped` if the session was already stopped.
    pub async fn stop(&self, grace: Duration) -> BridgeResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mailbox
            .send(SessionCommand::Stop {
                grace,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::SessionStopped(self.id.clone()))?;

        // The actor may exit before replying; the session is stopped either way.
        let _ = reply_rx.await;
        Ok(())
    }
}

struct SessionActor {
    id: String,
    mailbox: mpsc::Receiver<SessionCommand>,
    writer: Option<BoxedWriter>,
    inbound: Inbound,
    read_loop: Option<ReadLoopHandle>,
    process: Option<BackendProcess>,
    next_seq: i64,
    stop_grace: Duration,
    kill_grace: Duration,
    exit_timeout: Duration,
}

impl SessionActor {
    async fn run(mut self) {
        let mut stop_reply = None;
        let mut grace = self.stop_grace;

        while let Some(command) = self.mailbox.recv().await {
            match command {
                SessionCommand::Call {
                    request,
                    deadline,
                    reply,
                } => self.serve_call(request, deadline, reply).await,
                SessionCommand::Stop {
                    grace: requested,
                    reply,
                } => {
                    grace = requested;
                    stop_reply = Some(reply);
                    break;
                }
            }
        }

        if stop_reply.is_none() {
            debug!(
                target: "dap_bridge::session",
                "[{}] All handles dropped, stopping session",
                self.id
            );
        }

        // Refuse anything still queued.
        self.mailbox.close();
        while let Some(command) = self.mailbox.recv().await {
            match command {
                SessionCommand::Call { reply, .. } => {
                    let _ = reply.send(Err(BridgeError::SessionStopped(self.id.clone())));
                }
                SessionCommand::Stop { reply, .. } => {
                    let _ = reply.send(());
                }
            }
        }

        self.shutdown(grace).await;

        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    async fn serve_call(
        &mut self,
        request: Request,
        deadline: Deadline,
        mut reply: oneshot::Sender<BridgeResult<Response>>,
    ) {
        let command = request.command.clone();

        if reply.is_closed() {
            debug!(
                target: "dap_bridge::session",
                "[{}] Caller of '{}' went away before it was sent, skipping",
                self.id,
                command
            );
            return;
        }
        if let Some(expiry) = deadline.expired() {
            let _ = reply.send(Err(expiry.into_error(&command)));
            return;
        }

        let seq = match self.send_request(request).await {
            Ok(seq) => seq,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if let Some(result) = self
            .await_response(seq, &command, &deadline, Some(&mut reply))
            .await
        {
            let _ = reply.send(result);
        }
    }

    /// Stamp `request` with the next sequence number and write it.
    async fn send_request(&mut self, mut request: Request) -> BridgeResult<i64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BridgeError::SessionStopped(self.id.clone()))?;

        request.seq = self.next_seq;
        self.next_seq += 1;

        let message = request.to_json()?;
        debug!(
            target: "dap_bridge::session",
            "[{}] -> {} (seq {})",
            self.id,
            request.command,
            request.seq
        );
        write_message(writer, &message)
            .await
            .map_err(BridgeError::Write)?;
        Ok(request.seq)
    }

    /// Wait for the response to `seq`, absorbing events.
    ///
    /// Responses are polled before errors so a response that was read just
    /// before the connection closed is still delivered.
    ///
    /// Returns `None` if the caller dropped its reply receiver, in which case
    /// there is nobody to answer.
    async fn await_response(
        &mut self,
        seq: i64,
        command: &str,
        deadline: &Deadline,
        mut reply: Option<&mut oneshot::Sender<BridgeResult<Response>>>,
    ) -> Option<BridgeResult<Response>> {
        loop {
            let caller_gone = async {
                match reply.as_mut() {
                    Some(reply) => reply.closed().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                expiry = deadline.fired() => {
                    debug!(
                        target: "dap_bridge::session",
                        "[{}] Gave up waiting for '{}' (seq {}): {:?}",
                        self.id,
                        command,
                        seq,
                        expiry
                    );
                    return Some(Err(expiry.into_error(command)));
                }
                _ = caller_gone => {
                    debug!(
                        target: "dap_bridge::session",
                        "[{}] Caller of '{}' (seq {}) went away",
                        self.id,
                        command,
                        seq
                    );
                    return None;
                }
                response = self.inbound.responses.recv() => match response {
                    Some(response) if response.request_seq == seq => {
                        debug!(
                            target: "dap_bridge::session",
                            "[{}] <- {} (request_seq {}, success {})",
                            self.id,
                            response.command,
                            response.request_seq,
                            response.success
                        );
                        return Some(Ok(response));
                    }
                    Some(stale) => {
                        debug!(
                            target: "dap_bridge::session",
                            "[{}] Discarding stale '{}' response (request_seq {}, waiting for {})",
                            self.id,
                            stale.command,
                            stale.request_seq,
                            seq
                        );
                    }
                    None => return Some(Err(self.closed_error(command))),
                },
                event = self.inbound.events.recv() => match event {
                    Some(event) => self.log_event(&event),
                    None => return Some(Err(self.closed_error(command))),
                },
                error = self.inbound.errors.recv() => {
                    return Some(Err(match error {
                        Some(e) => BridgeError::Decode(e),
                        None => self.closed_error(command),
                    }));
                }
            }
        }
    }

    /// Error for a call whose read loop has ended.
    ///
    /// A decode error pushed just before the channels closed takes priority.
    fn closed_error(&mut self, command: &str) -> BridgeError {
        match self.inbound.errors.try_recv() {
            Ok(e) => BridgeError::Decode(e),
            Err(_) => BridgeError::TransportClosed {
                command: command.to_string(),
            },
        }
    }

    fn log_event(&self, event: &Event) {
        match event.event.as_str() {
            "output" => {
                let body: OutputEventBody =
                    serde_json::from_value(event.body.clone()).unwrap_or_default();
                debug!(
                    target: "dap_bridge::session",
                    "[{}] output ({}): {}",
                    self.id,
                    body.category.as_deref().unwrap_or("console"),
                    body.output.trim_end()
                );
            }
            "stopped" => {
                let body: StoppedEventBody =
                    serde_json::from_value(event.body.clone()).unwrap_or_default();
                info!(
                    target: "dap_bridge::session",
                    "[{}] Stopped: reason={}, thread={:?}",
                    self.id,
                    body.reason,
                    body.thread_id
                );
            }
            "terminated" => {
                info!(
                    target: "dap_bridge::session",
                    "[{}] Debuggee terminated",
                    self.id
                );
            }
            "exited" => {
                let body: ExitedEventBody =
                    serde_json::from_value(event.body.clone()).unwrap_or_default();
                info!(
                    target: "dap_bridge::session",
                    "[{}] Debuggee exited with code {}",
                    self.id,
                    body.exit_code
                );
            }
            other => {
                debug!(
                    target: "dap_bridge::session",
                    "[{}] Event: {}",
                    self.id,
                    other
                );
            }
        }
    }

    /// Two-phase shutdown. Runs exactly once, at actor exit.
    async fn shutdown(&mut self, grace: Duration) {
        // Phase 1: ask the backend to end the debuggee and disconnect.
        if self.writer.is_some() && !grace.is_zero() {
            let deadline = Deadline::after(grace);
            let outcome = match crate::ops::disconnect_request(true) {
                Ok(request) => match self.send_request(request).await {
                    Ok(seq) => self
                        .await_response(seq, "disconnect", &deadline, None)
                        .await
                        .unwrap_or_else(|| Err(Expiry::Cancelled.into_error("disconnect"))),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) if response.success => debug!(
                    target: "dap_bridge::session",
                    "[{}] Backend acknowledged disconnect",
                    self.id
                ),
                Ok(response) => debug!(
                    target: "dap_bridge::session",
                    "[{}] Backend rejected disconnect: {}",
                    self.id,
                    response.message.unwrap_or_default()
                ),
                Err(e) => debug!(
                    target: "dap_bridge::session",
                    "[{}] Disconnect did not complete: {}",
                    self.id,
                    e
                ),
            }
        }

        // Phase 2: tear down the connection and the process.
        if let Some(read_loop) = self.read_loop.take() {
            read_loop.stop().await;
        }
        if let Some(mut writer) = self.writer.take() {
            use tokio::io::AsyncWriteExt;
            if let Err(e) = writer.shutdown().await {
                debug!(
                    target: "dap_bridge::session",
                    "[{}] Closing connection: {}",
                    self.id,
                    e
                );
            }
        }
        if let Some(process) = self.process.take() {
            process.terminate(self.kill_grace, self.exit_timeout).await;
        }

        info!(target: "dap_bridge::session", "[{}] Session stopped", self.id);
    }
}
