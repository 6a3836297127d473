//! Exercises `DebugBackend`'s bookkeeping that doesn't require a live adapter process:
//! breakpoint CRUD, inspection defaults, and the error paths surfaced when no session
//! is active. The handshake/framing/correlation scenarios that do need a simulated
//! adapter (fragmented reads, coalesced messages, timeout+orphan, full initialize
//! handshake) live as `#[cfg(test)]` modules next to `codec`, `client`, and
//! `supervisor`, where a `tokio::io::duplex` pair stands in for the adapter's stdio.

use std::io::Write;

use debugmcp_dap::backend::DebugBackend;
use debugmcp_dap::config::{ConfigLoader, CONFIG_FILE_NAME};
use debugmcp_dap::error::DapError;
use debugmcp_dap::types::{OutputQuery, Uri, VariableScope};

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(CONFIG_FILE_NAME);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

fn backend_with_python_adapter() -> (tempfile::TempDir, DebugBackend) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"adapters": {"python": {"command": "python3", "args": ["-m", "debugpy.adapter"]}}}"#);
    let loader = ConfigLoader::load(&path).unwrap();
    let backend = DebugBackend::new(loader.config().adapters.clone());
    (dir, backend)
}

#[tokio::test]
async fn inactive_backend_reports_no_session() {
    let (_dir, backend) = backend_with_python_adapter();

    assert!(!backend.has_active_session());
    assert_eq!(backend.get_active_frame_id(), None);

    let err = backend.ensure_thread_id().await.unwrap_err();
    assert!(matches!(err, DapError::NoActiveSession));

    let err = backend.step_over().await.unwrap_err();
    assert!(matches!(err, DapError::NoActiveSession));

    let err = backend.evaluate_expression("1 + 1", None).await.unwrap_err();
    assert!(matches!(err, DapError::NoActiveSession));

    let err = backend.get_variables(1, VariableScope::All).await.unwrap_err();
    assert!(matches!(err, DapError::NoActiveSession));
}

#[tokio::test]
async fn current_debug_state_defaults_when_inactive() {
    let (_dir, backend) = backend_with_python_adapter();
    let state = backend.get_current_debug_state(5).await;
    assert!(!state.session_active);
    assert_eq!(state.current_line, None);
    assert!(state.next_lines.is_empty());
}

#[tokio::test]
async fn breakpoints_are_tracked_without_a_session() {
    let (dir, backend) = backend_with_python_adapter();
    let script = dir.path().join("main.py");
    let uri = Uri::from_path(&script);

    backend.add_breakpoint(&uri, 10).await;
    backend.add_breakpoint(&uri, 20).await;
    // Re-adding an existing line is a no-op, not a duplicate entry.
    backend.add_breakpoint(&uri, 10).await;

    let breakpoints = backend.get_breakpoints();
    assert_eq!(breakpoints.len(), 2);

    backend.remove_breakpoint(&uri, 10).await;
    assert_eq!(backend.get_breakpoints().len(), 1);

    backend.clear_all_breakpoints().await;
    assert!(backend.get_breakpoints().is_empty());
}

#[tokio::test]
async fn recent_output_is_empty_before_any_session_runs() {
    let (_dir, backend) = backend_with_python_adapter();
    let out = backend.get_recent_output(OutputQuery::default());
    assert_eq!(out.stdout, "");
    assert_eq!(out.stderr, "");
    assert!(!out.truncated);
}

#[tokio::test]
async fn starting_with_an_unconfigured_language_fails_without_spawning_anything() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, r#"{"adapters": {"python": {"command": "python3"}}}"#);
    let loader = ConfigLoader::load(&path).unwrap();
    let backend = DebugBackend::new(loader.config().adapters.clone());

    let script = dir.path().join("main.rb");
    let cfg = loader.provide_debug_config(&script, dir.path());
    assert_eq!(cfg.adapter_type, "ruby");

    let started = backend.start_debugging(dir.path(), cfg).await;
    assert!(!started);
    assert!(!backend.has_active_session());
}
