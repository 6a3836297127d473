//! Error kinds for the DAP backend.
//!
//! Mirrors the error kinds enumerated in the design: failures a caller needs to match
//! on (not just display) get their own variant with the fields needed to act on them.
//! Background failures (stderr lines, orphan responses, panicking subscribers) never
//! reach this type — they are logged via `tracing` and swallowed at the source.

use std::path::PathBuf;
use std::time::Duration;

/// Everything a caller of [`crate::backend::DebugBackend`] or [`crate::client::DapClient`]
/// can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DapError {
    /// The configuration file did not exist or could not be read.
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was attempted.
        path: PathBuf,
    },

    /// The configuration file existed but failed validation.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid {
        /// Human-readable validation failure.
        reason: String,
    },

    /// `startDebugging` was asked for a language with no adapter descriptor.
    #[error("no adapter configured for language '{language}' (configured: {configured:?})")]
    NoAdapterConfigured {
        /// The language key that was looked up.
        language: String,
        /// The language keys that are actually configured.
        configured: Vec<String>,
    },

    /// The supervisor refuses to start a second adapter while one is already active.
    #[error("an adapter is already active")]
    AdapterAlreadyActive,

    /// The adapter child process could not be spawned.
    #[error("failed to spawn adapter process: {0}")]
    AdapterSpawnFailed(String),

    /// The `initialized` event did not arrive before the configured deadline.
    #[error("adapter did not send 'initialized' within {waited:?}")]
    InitializationTimeout {
        /// How long the backend waited.
        waited: Duration,
    },

    /// The adapter responded to a request with `success: false`.
    #[error("DAP request '{command}' failed: {message}")]
    RequestFailed {
        /// The command that was sent.
        command: String,
        /// The adapter-supplied failure message (or the documented fallback).
        message: String,
    },

    /// A request's per-request timer fired before a response arrived.
    #[error("DAP request '{command}' timed out after {timeout:?}")]
    RequestTimedOut {
        /// The command that was sent.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// An operation was attempted after the DAP client was closed.
    #[error("DAP client is closed")]
    ClientClosed,

    /// An operation required an active adapter/session but none is present.
    #[error("no active debug session")]
    NoActiveSession,

    /// `threads` returned an empty list when a thread id was required.
    #[error("no threads available")]
    NoThreadsAvailable,

    /// The adapter process exited unexpectedly.
    #[error("adapter crashed (code={code:?}, signal={signal:?})")]
    AdapterCrashed {
        /// Process exit code, if the OS reported one.
        code: Option<i32>,
        /// Terminating signal, if the process was killed by one (Unix only).
        signal: Option<i32>,
    },

    /// A value that should always be representable as JSON failed to (de)serialize.
    /// Not one of the documented error kinds; it exists because every typed wrapper
    /// returns `Result<_, DapError>` and `serde_json` calls are technically fallible.
    #[error("failed to (de)serialize DAP payload: {0}")]
    Serialization(String),
}
