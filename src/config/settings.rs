use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::retry::{RetryPolicy, millis};

/// Top-level settings, one table per concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub backend: BackendSettings,
    pub session: SessionSettings,
}

/// How the debugger backend is started and reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Executable name or path, resolved through `PATH`.
    pub command: String,
    pub args: Vec<String>,
    /// Line prefix the backend prints on stdout before its listen address.
    pub announce_prefix: String,
    #[serde(with = "millis")]
    pub announce_timeout: Duration,
    /// Retry around the whole spawn, announce and dial sequence.
    pub launch_retry: RetryPolicy,
    /// Retry around a single dial of the announced address.
    pub dial_retry: RetryPolicy,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            command: "dlv".to_string(),
            args: vec!["dap".to_string(), "--listen=127.0.0.1:0".to_string()],
            announce_prefix: "DAP server listening at: ".to_string(),
            announce_timeout: Duration::from_secs(5),
            launch_retry: RetryPolicy::LAUNCH,
            dial_retry: RetryPolicy::DIAL,
        }
    }
}

/// Per-session timing and buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Deadline applied by the console and `run` workflow to each call.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// How long stop waits for the `disconnect` response.
    #[serde(with = "millis")]
    pub stop_grace: Duration,
    /// Time between SIGTERM and SIGKILL.
    #[serde(with = "millis")]
    pub kill_grace: Duration,
    /// How long to wait for the killed process to be reaped.
    #[serde(with = "millis")]
    pub exit_timeout: Duration,
    /// Global ceiling for stopping every session at registry shutdown.
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    /// Capacity of each of the response, event and error channels.
    pub channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(2),
            kill_grace: Duration::from_secs(2),
            exit_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            channel_capacity: 16,
        }
    }
}

impl BridgeSettings {
    /// Reject values that would make the bridge unusable.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.backend.command.trim().is_empty() {
            return Err(BridgeError::config("backend.command must not be empty"));
        }
        if self.backend.announce_prefix.is_empty() {
            return Err(BridgeError::config(
                "backend.announce_prefix must not be empty",
            ));
        }
        if self.session.channel_capacity == 0 {
            return Err(BridgeError::config(
                "session.channel_capacity must be at least 1",
            ));
        }
        for (name, policy) in [
            ("backend.launch_retry", &self.backend.launch_retry),
            ("backend.dial_retry", &self.backend.dial_retry),
        ] {
            if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
                return Err(BridgeError::config(format!(
                    "{}.multiplier must be a finite number >= 1.0",
                    name
                )));
            }
        }
        Ok(())
    }
}
