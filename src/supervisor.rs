//! Adapter Supervisor: spawns the adapter child process, wires its stdio into a
//! [`DapClient`], forwards stderr, and performs ordered shutdown.
//!
//! Spawns whatever `AdapterDescriptor` the configured language key resolves to, with
//! piped stdio and best-effort kill on teardown.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::broadcast;

use crate::client::DapClient;
use crate::error::DapError;
use crate::types::AdapterDescriptor;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Emitted around an adapter child's lifetime.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The child exited, for any reason.
    AdapterExited { code: Option<i32>, signal: Option<i32> },
    /// The child exited with a non-zero, non-null code (or a signal).
    AdapterCrashed { code: Option<i32>, signal: Option<i32> },
}

struct ActiveAdapter {
    pid: u32,
    client: Arc<DapClient>,
}

/// Owns at most one adapter child process at a time.
pub struct AdapterSupervisor {
    active: Arc<Mutex<Option<ActiveAdapter>>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Default for AdapterSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterSupervisor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            active: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    pub fn client(&self) -> Option<Arc<DapClient>> {
        self.active.lock().unwrap().as_ref().map(|a| a.client.clone())
    }

    /// Spawns `descriptor`, wires its stdio into a fresh [`DapClient`], and returns
    /// the client. Refuses to start if an adapter is already active.
    pub async fn start(&self, descriptor: &AdapterDescriptor, fallback_cwd: Option<&Path>) -> Result<Arc<DapClient>, DapError> {
        if self.is_active() {
            return Err(DapError::AdapterAlreadyActive);
        }

        let mut command = Command::new(&descriptor.command);
        command.args(&descriptor.args);
        if let Some(cwd) = descriptor.cwd.as_deref().or(fallback_cwd) {
            command.current_dir(cwd);
        }
        for (key, value) in &descriptor.env {
            command.env(key, value);
        }
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| DapError::AdapterSpawnFailed(e.to_string()))?;
        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let client = Arc::new(DapClient::spawn(stdout, stdin, DEFAULT_REQUEST_TIMEOUT));
        tokio::spawn(forward_stderr(stderr));

        let active = self.active.clone();
        let events = self.events.clone();
        let client_for_exit = client.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            client_for_exit.close().await;
            *active.lock().unwrap() = None;

            let (code, signal) = exit_parts(status.as_ref().ok());
            let _ = events.send(SupervisorEvent::AdapterExited { code, signal });
            if !matches!(code, Some(0) | None) {
                let _ = events.send(SupervisorEvent::AdapterCrashed { code, signal });
            }
        });

        *self.active.lock().unwrap() = Some(ActiveAdapter { pid, client: client.clone() });
        Ok(client)
    }

    /// Best-effort `disconnect`, close the client, then SIGTERM with a grace period
    /// before SIGKILL. A no-op if no adapter is active.
    pub async fn stop(&self) {
        let snapshot = self.active.lock().unwrap().as_ref().map(|a| (a.pid, a.client.clone()));
        let Some((pid, client)) = snapshot else { return };

        let _ = client
            .disconnect(crate::protocol::DisconnectArguments {
                restart: None,
                terminate_debuggee: Some(true),
            })
            .await;
        client.close().await;

        terminate_process(pid);
        for _ in 0..(TERMINATE_GRACE.as_millis() / TERMINATE_POLL_INTERVAL.as_millis()) {
            if !self.is_active() {
                return;
            }
            tokio::time::sleep(TERMINATE_POLL_INTERVAL).await;
        }
        kill_process(pid);
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "adapter_stderr", "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "error reading adapter stderr");
                break;
            }
        }
    }
}

fn exit_parts(status: Option<&ExitStatus>) -> (Option<i32>, Option<i32>) {
    let Some(status) = status else { return (None, None) };
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

#[cfg(unix)]
fn terminate_process(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(windows)]
fn terminate_process(pid: u32) {
    kill_process(pid);
}

#[cfg(windows)]
fn kill_process(pid: u32) {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if !handle.is_null() {
            TerminateProcess(handle, 1);
            CloseHandle(handle);
        }
    }
}
