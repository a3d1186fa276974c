//! Backend startup: spawning the debugger and connecting to it.
//!
//! The production path ([`DelveConnector`]) runs `dlv dap`, waits for the
//! listen address it announces on stdout, then dials it over TCP. Both the
//! dial and the whole sequence are retried with backoff since the backend
//! binds its port asynchronously. A missing executable is never retried.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::transport::{BoxedReader, BoxedWriter};
use crate::config::BackendSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::retry::retry_with_backoff;

/// How long to wait for a process we gave up on during setup to exit.
const SETUP_CLEANUP_TIMEOUT: Duration = Duration::from_secs(1);

/// A live connection to a backend, plus the process behind it if we own one.
pub struct BackendConnection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub process: Option<BackendProcess>,
}

impl BackendConnection {
    /// Connection with no owned process (tests, or a backend started elsewhere).
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader,
            writer,
            process: None,
        }
    }

    pub fn with_process(mut self, process: BackendProcess) -> Self {
        self.process = Some(process);
        self
    }
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// Something that can produce a fresh backend connection for a new session.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = BridgeResult<BackendConnection>> + Send;
}

/// Owned backend child process.
///
/// Dropping it without calling [`terminate`](Self::terminate) still kills
/// the child.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
    command: String,
}

impl BackendProcess {
    pub fn new(child: Child, command: impl Into<String>) -> Self {
        Self {
            child,
            command: command.into(),
        }
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the process with escalation.
    ///
    /// **Unix**: SIGTERM, wait up to `kill_grace`, then SIGKILL.
    /// **Other platforms**: kill immediately.
    ///
    /// Then waits up to `exit_timeout` for the exit to be confirmed. Never
    /// fails; an unconfirmed exit is logged.
    pub async fn terminate(mut self, kill_grace: Duration, exit_timeout: Duration) {
        #[cfg(unix)]
        if !kill_grace.is_zero() && self.send_sigterm() {
            match tokio::time::timeout(kill_grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(
                        target: "dap_bridge::backend",
                        "{} exited after SIGTERM: {}",
                        self.command,
                        status
                    );
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "dap_bridge::backend",
                        "Failed waiting for {} after SIGTERM: {}",
                        self.command,
                        e
                    );
                }
                Err(_) => {
                    debug!(
                        target: "dap_bridge::backend",
                        "{} ignored SIGTERM for {:?}, killing",
                        self.command,
                        kill_grace
                    );
                }
            }
        }
        #[cfg(not(unix))]
        let _ = kill_grace;

        self.kill(exit_timeout).await;
    }

    /// Kill immediately and wait up to `exit_timeout` for the exit.
    pub async fn kill(mut self, exit_timeout: Duration) {
        if let Err(e) = self.child.start_kill() {
            // Already exited and reaped.
            debug!(
                target: "dap_bridge::backend",
                "Kill of {} skipped: {}",
                self.command,
                e
            );
        }

        match tokio::time::timeout(exit_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!(
                target: "dap_bridge::backend",
                "{} exited: {}",
                self.command,
                status
            ),
            Ok(Err(e)) => warn!(
                target: "dap_bridge::backend",
                "Failed waiting for {} to exit: {}",
                self.command,
                e
            ),
            Err(_) => warn!(
                target: "dap_bridge::backend",
                "{} did not confirm exit within {:?}",
                self.command,
                exit_timeout
            ),
        }
    }

    /// Returns true if the signal was delivered.
    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return false;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    target: "dap_bridge::backend",
                    "SIGTERM to {} (pid {}) failed: {}",
                    self.command,
                    pid,
                    e
                );
                false
            }
        }
    }
}

/// Extract the listen address from one line of backend stdout.
pub fn parse_listen_address(line: &str, prefix: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix(prefix)
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
}

/// Starts `dlv dap` per session.
#[derive(Debug, Clone)]
pub struct DelveConnector {
    settings: BackendSettings,
    cancel: CancellationToken,
}

impl DelveConnector {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts any retry wait in progress.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One spawn, announce and dial sequence.
    async fn launch_once(&self, program: &Path) -> BridgeResult<BackendConnection> {
        let command_name = self.settings.command.clone();

        let mut child = Command::new(program)
            .args(&self.settings.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                command: command_name.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = BackendProcess::new(child, command_name.clone());

        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            process.kill(SETUP_CLEANUP_TIMEOUT).await;
            return Err(BridgeError::Spawn {
                command: command_name,
                source: std::io::Error::other("stdout/stderr were not captured"),
            });
        };

        debug!(
            target: "dap_bridge::backend",
            "Spawned {} (pid {:?})",
            command_name,
            process.id()
        );

        let (address_tx, address_rx) = oneshot::channel();
        tokio::spawn(watch_stdout(
            stdout,
            self.settings.announce_prefix.clone(),
            address_tx,
        ));
        tokio::spawn(log_stderr(stderr, command_name.clone()));

        let address = match tokio::time::timeout(self.settings.announce_timeout, address_rx).await
        {
            Ok(Ok(address)) => address,
            Ok(Err(_)) => {
                process.kill(SETUP_CLEANUP_TIMEOUT).await;
                return Err(BridgeError::AnnounceMissing);
            }
            Err(_) => {
                process.kill(SETUP_CLEANUP_TIMEOUT).await;
                return Err(BridgeError::AnnounceTimeout(self.settings.announce_timeout));
            }
        };

        debug!(
            target: "dap_bridge::backend",
            "{} listening at {}",
            command_name,
            address
        );

        let dialed = retry_with_backoff(&self.settings.dial_retry, &self.cancel, || {
            TcpStream::connect(address.clone())
        })
        .await;

        let stream = match dialed {
            Ok(stream) => stream,
            Err(source) => {
                process.kill(SETUP_CLEANUP_TIMEOUT).await;
                return Err(BridgeError::Connect { address, source });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(target: "dap_bridge::backend", "set_nodelay failed: {}", e);
        }

        let (reader, writer) = stream.into_split();
        Ok(BackendConnection::new(Box::new(reader), Box::new(writer)).with_process(process))
    }
}

impl Connector for DelveConnector {
    async fn connect(&self) -> BridgeResult<BackendConnection> {
        let program =
            which::which(&self.settings.command).map_err(|source| BridgeError::ExecutableNotFound {
                command: self.settings.command.clone(),
                source,
            })?;

        retry_with_backoff(&self.settings.launch_retry, &self.cancel, || {
            self.launch_once(&program)
        })
        .await
        .map_err(|e| BridgeError::Launch(Box::new(e)))
    }
}

/// Forward the announced address once, then keep draining stdout into the log.
async fn watch_stdout(stdout: ChildStdout, prefix: String, announce: oneshot::Sender<String>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut announce = Some(announce);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if announce.is_some()
                    && let Some(address) = parse_listen_address(&line, &prefix)
                {
                    if let Some(tx) = announce.take() {
                        let _ = tx.send(address);
                    }
                    continue;
                }
                debug!(target: "dap_bridge::backend", "stdout: {}", line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(target: "dap_bridge::backend", "stdout read failed: {}", e);
                break;
            }
        }
    }
}

async fn log_stderr(stderr: ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "dap_bridge::backend", "{} stderr: {}", command, line),
            Ok(None) => break,
            Err(e) => {
                debug!(target: "dap_bridge::backend", "stderr read failed: {}", e);
                break;
            }
        }
    }
}
