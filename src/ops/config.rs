//! Caller-facing descriptors for launching, attaching and breakpoints.
//!
//! These are plain values: built by the caller, turned into one request,
//! then discarded.

use serde::{Deserialize, Serialize};

/// A line breakpoint in one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakpointLocation {
    pub file: String,
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

impl BreakpointLocation {
    pub fn new(file: impl Into<String>, line: i64) -> Self {
        Self {
            file: file.into(),
            line,
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A breakpoint on a function name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    pub name: String,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

impl FunctionBreakpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// How to start a debug target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchConfig {
    pub name: String,
    /// Go package directory, `.go` file, test file or pre-built binary.
    pub program: String,
    pub args: Vec<String>,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub stop_on_entry: bool,
    pub build_flags: Vec<String>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            name: "dap-bridge".to_string(),
            program: program.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    #[default]
    Local,
    Remote,
}

impl AttachMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachMode::Local => "local",
            AttachMode::Remote => "remote",
        }
    }
}

/// How to attach to a running process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttachConfig {
    pub name: String,
    pub process_id: i64,
    pub mode: AttachMode,
    /// Only sent in remote mode.
    pub host: Option<String>,
    /// Only sent in remote mode.
    pub port: Option<u16>,
}

impl AttachConfig {
    pub fn local(process_id: i64) -> Self {
        Self {
            name: "dap-bridge".to_string(),
            process_id,
            ..Self::default()
        }
    }
}
