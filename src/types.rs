//! Portable, wire-neutral types.
//!
//! These are the shapes callers of [`crate::backend::DebugBackend`] exchange with the
//! core. They are deliberately decoupled from `protocol.rs`'s DAP wire types: a
//! `types::Breakpoint` describes what the backend tracks, a `protocol::SourceBreakpoint`
//! describes what goes over the wire in a `setBreakpoints` request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file-system path plus its forward-slash normalized form.
///
/// No scheme handling beyond the plain file case — `file://` URIs are accepted on
/// input and converted with the `url` crate, but `Uri` itself is not a general URI type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub path: PathBuf,
    pub normalized: String,
}

impl Uri {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let normalized = path.to_string_lossy().replace('\\', "/");
        Self { path, normalized }
    }

    /// Parses a `file://` URI, falling back to treating the input as a bare path.
    pub fn parse(raw: &str) -> Self {
        match url::Url::parse(raw).ok().and_then(|u| u.to_file_path().ok()) {
            Some(path) => Self::from_path(path),
            None => Self::from_path(raw),
        }
    }
}

/// `launch` vs `attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Launch,
    Attach,
}

/// A property bag describing how to launch or attach to a debuggee.
///
/// `extra` carries every adapter-specific field the core does not otherwise name, and
/// is round-tripped untouched (flattened back into the JSON object sent to the adapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub request: RequestKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, rename = "stopOnEntry", skip_serializing_if = "Option::is_none")]
    pub stop_on_entry: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A source-line breakpoint location, independent of the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

/// A function-name breakpoint, independent of the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLocation {
    pub name: String,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

/// A source-line or function breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Breakpoint {
    Source(SourceLocation),
    Function(FunctionLocation),
}

/// What to spawn for a given language key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdapterDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The loaded, validated, variable-expanded configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StandaloneConfig {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub adapters: HashMap<String, AdapterDescriptor>,
    #[serde(default)]
    pub defaults: HashMap<String, Map<String, Value>>,
}

impl StandaloneConfig {
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(3001)
    }

    pub fn timeout_or_default(&self) -> u64 {
        self.timeout.unwrap_or(180)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
    Telemetry,
}

impl OutputCategory {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "console" => Self::Console,
            "stderr" => Self::Stderr,
            "telemetry" => Self::Telemetry,
            _ => Self::Stdout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoppedEvent {
    pub reason: String,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub all_threads_stopped: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub category: OutputCategory,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct TerminatedEvent {
    pub restart: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameSource {
    pub path: Option<PathBuf>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub id: i64,
    pub name: String,
    pub line: i64,
    pub column: i64,
    pub source: Option<FrameSource>,
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

/// Session-state-machine states; see `tracker` for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Initializing,
    Running,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub text: String,
    pub category: OutputCategory,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Default)]
pub struct DebugState {
    pub session_active: bool,
    pub file_full_path: Option<PathBuf>,
    pub file_name: Option<String>,
    pub current_line: Option<i64>,
    pub current_line_content: Option<String>,
    pub next_lines: Vec<String>,
    pub frame_id: Option<i64>,
    pub thread_id: Option<i64>,
    pub frame_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    Local,
    Global,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeVariables {
    pub variables: Vec<crate::protocol::ProtocolVariable>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvaluateResult {
    pub result: String,
    #[allow(dead_code)]
    pub type_hint: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OutputQuery {
    pub since: Option<SystemTime>,
    pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RecentOutput {
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}
