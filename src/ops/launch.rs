//! Session lifecycle: initialize, launch/attach, configurationDone, disconnect.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value, json};

use super::config::{AttachConfig, AttachMode, LaunchConfig};
use super::{arguments, decode_body, round_trip};
use crate::dap::types::{Capabilities, DisconnectArguments, InitializeRequestArguments};
use crate::dap::{Request, Response};
use crate::error::BridgeResult;
use crate::session::{Deadline, SessionHandle};

const ADAPTER_ID: &str = "go";

/// Build flags that disable optimizations and inlining.
const DEBUG_BUILD_FLAGS: [&str; 2] = ["-gcflags", "all=-N -l"];

/// How the backend starts the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Build the package or file, then debug it.
    Debug,
    /// Build as a test binary, then debug it.
    Test,
    /// Run a pre-built binary.
    Exec,
}

impl LaunchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchMode::Debug => "debug",
            LaunchMode::Test => "test",
            LaunchMode::Exec => "exec",
        }
    }

    /// Guess the mode from the program path and its arguments.
    ///
    /// In order:
    /// - ends with `.test` or contains `__debug_bin`: exec
    /// - ends with `_test.go`, or the first argument contains `-test.`: test
    /// - does not end with `.go` and is an existing executable file: exec
    /// - otherwise: debug
    ///
    /// This is a name-based heuristic and can misclassify, e.g. a directory
    /// that happens to contain `__debug_bin` in its path.
    pub fn detect(program: &str, args: &[String]) -> Self {
        if program.ends_with(".test") || program.contains("__debug_bin") {
            return LaunchMode::Exec;
        }
        let test_flag = args.first().is_some_and(|arg| arg.contains("-test."));
        if program.ends_with("_test.go") || test_flag {
            return LaunchMode::Test;
        }
        if !program.ends_with(".go") && is_executable_file(Path::new(program)) {
            return LaunchMode::Exec;
        }
        LaunchMode::Debug
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "exe") && path.is_file()
}

/// Ensure optimization-disabling flags are present outside exec mode.
///
/// Flags already mentioning `-gcflags` or `-N -l` are left untouched;
/// otherwise `-gcflags all=-N -l` is prepended.
pub fn with_debug_build_flags(mode: LaunchMode, flags: &[String]) -> Vec<String> {
    if mode == LaunchMode::Exec {
        return flags.to_vec();
    }
    let has_debug_flags = flags
        .iter()
        .any(|flag| flag.contains("-gcflags") || flag.contains("-N -l"));
    if has_debug_flags {
        return flags.to_vec();
    }

    log::debug!(
        target: "dap_bridge::ops",
        "Adding debug build flags {:?}",
        DEBUG_BUILD_FLAGS
    );
    DEBUG_BUILD_FLAGS
        .iter()
        .map(|flag| flag.to_string())
        .chain(flags.iter().cloned())
        .collect()
}

/// `KEY=value` entries as the object form the adapter expects.
fn env_object(entries: &[String]) -> Map<String, Value> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), Value::String(value.to_string())),
            None => (entry.clone(), Value::String(String::new())),
        })
        .collect()
}

pub fn build_initialize_request(client_id: &str) -> BridgeResult<Request> {
    arguments(
        "initialize",
        &InitializeRequestArguments {
            client_id: client_id.to_string(),
            client_name: Some(client_id.to_string()),
            adapter_id: ADAPTER_ID.to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".to_string(),
            supports_variable_type: true,
        },
    )
}

/// Build a `launch` request, choosing the mode from the program path.
pub fn build_launch_request(config: &LaunchConfig) -> BridgeResult<Request> {
    let mode = LaunchMode::detect(&config.program, &config.args);
    log::debug!(
        target: "dap_bridge::ops",
        "Using mode={} for program={}",
        mode,
        config.program
    );

    let mut args = Map::new();
    args.insert("name".into(), json!(config.name));
    args.insert("type".into(), json!(ADAPTER_ID));
    args.insert("request".into(), json!("launch"));
    args.insert("mode".into(), json!(mode.as_str()));
    args.insert("program".into(), json!(config.program));

    if !config.args.is_empty() {
        args.insert("args".into(), json!(config.args));
    }
    if !config.env.is_empty() {
        args.insert("env".into(), Value::Object(env_object(&config.env)));
    }
    if let Some(dir) = config.working_dir.as_deref().filter(|d| !d.is_empty()) {
        args.insert("cwd".into(), json!(dir));
    }
    if config.stop_on_entry {
        args.insert("stopOnEntry".into(), json!(true));
    }

    let build_flags = with_debug_build_flags(mode, &config.build_flags);
    if !build_flags.is_empty() {
        args.insert("buildFlags".into(), json!(build_flags));
    }

    Ok(Request::with_arguments("launch", Value::Object(args)))
}

/// Build an `attach` request. Host and port are only sent in remote mode.
pub fn build_attach_request(config: &AttachConfig) -> BridgeResult<Request> {
    let mut args = Map::new();
    args.insert("name".into(), json!(config.name));
    args.insert("type".into(), json!(ADAPTER_ID));
    args.insert("request".into(), json!("attach"));
    args.insert("mode".into(), json!(config.mode.as_str()));
    args.insert("processId".into(), json!(config.process_id));

    if config.mode == AttachMode::Remote {
        if let Some(host) = config.host.as_deref().filter(|h| !h.is_empty()) {
            args.insert("host".into(), json!(host));
        }
        if let Some(port) = config.port.filter(|p| *p != 0) {
            args.insert("port".into(), json!(port));
        }
    }

    Ok(Request::with_arguments("attach", Value::Object(args)))
}

pub fn build_configuration_done_request() -> BridgeResult<Request> {
    Ok(Request::new("configurationDone"))
}

pub fn build_disconnect_request(terminate_debuggee: bool) -> BridgeResult<Request> {
    arguments(
        "disconnect",
        &DisconnectArguments {
            restart: None,
            terminate_debuggee: Some(terminate_debuggee),
        },
    )
}

/// Negotiate capabilities with the adapter.
pub async fn initialize_session(
    session: &SessionHandle,
    client_id: &str,
    deadline: Deadline,
) -> BridgeResult<Capabilities> {
    let response = round_trip(session, build_initialize_request(client_id)?, deadline).await?;
    decode_body("initialize", &response)
}

pub async fn launch_program(
    session: &SessionHandle,
    config: &LaunchConfig,
    deadline: Deadline,
) -> BridgeResult<Response> {
    round_trip(session, build_launch_request(config)?, deadline).await
}

pub async fn attach_to_process(
    session: &SessionHandle,
    config: &AttachConfig,
    deadline: Deadline,
) -> BridgeResult<Response> {
    round_trip(session, build_attach_request(config)?, deadline).await
}

/// Tell the adapter configuration is complete and the target may run.
pub async fn configuration_done(
    session: &SessionHandle,
    deadline: Deadline,
) -> BridgeResult<Response> {
    round_trip(session, build_configuration_done_request()?, deadline).await
}

pub async fn disconnect(
    session: &SessionHandle,
    terminate_debuggee: bool,
    deadline: Deadline,
) -> BridgeResult<Response> {
    round_trip(session, build_disconnect_request(terminate_debuggee)?, deadline).await
}
