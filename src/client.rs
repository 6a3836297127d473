//! The DAP client: sequence numbering, request/response correlation, per-request
//! timeouts, event fan-out, and typed convenience wrappers.
//!
//! A server-side header/body loop only ever answers requests it receives; this type
//! also *sends* requests and must match replies back to them by `request_seq`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::codec::{encode_frame, Frame, FrameReader};
use crate::error::DapError;
use crate::protocol;

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_REVERSE_CHANNEL_CAPACITY: usize = 64;

/// What a subscriber to [`DapClient::subscribe_events`] observes.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A `type: "event"` message from the adapter.
    Dap(protocol::Event),
    /// A response that arrived after its request's timeout had already fired.
    OrphanResponse(Value),
    /// The client closed (EOF, I/O error, or an explicit `close()`).
    Closed,
}

struct PendingRequest {
    command: String,
    resolver: oneshot::Sender<Result<Value, DapError>>,
}

/// An async DAP client driving a single adapter over any `AsyncRead`/`AsyncWrite` pair.
pub struct DapClient {
    next_seq: AtomicI64,
    pending: Arc<Mutex<HashMap<i64, PendingRequest>>>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    events_tx: broadcast::Sender<ClientEvent>,
    closed: Arc<AtomicBool>,
    default_timeout: Duration,
}

impl DapClient {
    /// Spawns the background reader and writer tasks over `input`/`output` and
    /// returns a handle. `default_timeout` applies to any request sent through
    /// [`DapClient::send_request`] (use [`DapClient::send_request_with_timeout`] to
    /// override it per call).
    pub fn spawn<R, W>(input: R, output: W, default_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Arc<Mutex<HashMap<i64, PendingRequest>>> = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(writer_loop(output, write_rx));
        tokio::spawn(reader_loop(
            FrameReader::new(input),
            pending.clone(),
            events_tx.clone(),
            closed.clone(),
        ));

        Self {
            next_seq: AtomicI64::new(1),
            pending,
            write_tx,
            events_tx,
            closed,
            default_timeout,
        }
    }

    /// Subscribes to the generic event stream (DAP events, orphan responses, close).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the client closed, failing every pending request exactly once. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        for (_, req) in pending.drain() {
            let _ = req.resolver.send(Err(DapError::ClientClosed));
        }
        drop(pending);
        let _ = self.events_tx.send(ClientEvent::Closed);
    }

    /// The generic request primitive every typed wrapper is built on.
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<Value, DapError> {
        self.send_request_with_timeout(command, arguments, self.default_timeout).await
    }

    pub async fn send_request_with_timeout(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, DapError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DapError::ClientClosed);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            seq,
            PendingRequest {
                command: command.to_string(),
                resolver: tx,
            },
        );

        let request = protocol::Request::new(seq, command, arguments);
        let frame = encode_frame(&request).map_err(|e| DapError::Serialization(e.to_string()))?;

        if self.write_tx.send(frame).is_err() {
            self.pending.lock().unwrap().remove(&seq);
            return Err(DapError::ClientClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DapError::ClientClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&seq);
                Err(DapError::RequestTimedOut {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn typed<A: Serialize, T: DeserializeOwned>(&self, command: &str, args: A) -> Result<T, DapError> {
        let value = serde_json::to_value(args).map_err(|e| DapError::Serialization(e.to_string()))?;
        let body = self.send_request(command, Some(value)).await?;
        serde_json::from_value(body).map_err(|e| DapError::Serialization(e.to_string()))
    }

    pub async fn initialize(&self, args: protocol::InitializeRequestArguments) -> Result<protocol::Capabilities, DapError> {
        self.typed("initialize", args).await
    }

    pub async fn launch(&self, args: Value) -> Result<(), DapError> {
        self.send_request("launch", Some(args)).await?;
        Ok(())
    }

    pub async fn attach(&self, args: Value) -> Result<(), DapError> {
        self.send_request("attach", Some(args)).await?;
        Ok(())
    }

    pub async fn disconnect(&self, args: protocol::DisconnectArguments) -> Result<(), DapError> {
        let value = serde_json::to_value(args).map_err(|e| DapError::Serialization(e.to_string()))?;
        self.send_request("disconnect", Some(value)).await?;
        Ok(())
    }

    pub async fn terminate(&self, args: protocol::TerminateArguments) -> Result<(), DapError> {
        let value = serde_json::to_value(args).map_err(|e| DapError::Serialization(e.to_string()))?;
        self.send_request("terminate", Some(value)).await?;
        Ok(())
    }

    pub async fn set_breakpoints(
        &self,
        args: protocol::SetBreakpointsArguments,
    ) -> Result<protocol::SetBreakpointsResponseBody, DapError> {
        self.typed("setBreakpoints", args).await
    }

    pub async fn set_function_breakpoints(&self, args: protocol::SetFunctionBreakpointsArguments) -> Result<(), DapError> {
        let value = serde_json::to_value(args).map_err(|e| DapError::Serialization(e.to_string()))?;
        self.send_request("setFunctionBreakpoints", Some(value)).await?;
        Ok(())
    }

    pub async fn set_exception_breakpoints(&self, args: protocol::SetExceptionBreakpointsArguments) -> Result<(), DapError> {
        let value = serde_json::to_value(args).map_err(|e| DapError::Serialization(e.to_string()))?;
        self.send_request("setExceptionBreakpoints", Some(value)).await?;
        Ok(())
    }

    pub async fn configuration_done(&self) -> Result<(), DapError> {
        self.send_request("configurationDone", None).await?;
        Ok(())
    }

    pub async fn continue_(&self, thread_id: i64) -> Result<protocol::ContinueResponseBody, DapError> {
        self.typed("continue", protocol::ContinueArguments { thread_id }).await
    }

    pub async fn next(&self, thread_id: i64) -> Result<(), DapError> {
        self.send_request("next", Some(serde_json::json!({ "threadId": thread_id }))).await?;
        Ok(())
    }

    pub async fn step_in(&self, thread_id: i64) -> Result<(), DapError> {
        self.send_request("stepIn", Some(serde_json::json!({ "threadId": thread_id }))).await?;
        Ok(())
    }

    pub async fn step_out(&self, thread_id: i64) -> Result<(), DapError> {
        self.send_request("stepOut", Some(serde_json::json!({ "threadId": thread_id }))).await?;
        Ok(())
    }

    pub async fn pause(&self, thread_id: i64) -> Result<(), DapError> {
        self.send_request("pause", Some(serde_json::json!({ "threadId": thread_id }))).await?;
        Ok(())
    }

    pub async fn stack_trace(&self, args: protocol::StackTraceArguments) -> Result<protocol::StackTraceResponseBody, DapError> {
        self.typed("stackTrace", args).await
    }

    pub async fn scopes(&self, args: protocol::ScopesArguments) -> Result<protocol::ScopesResponseBody, DapError> {
        self.typed("scopes", args).await
    }

    pub async fn variables(&self, args: protocol::VariablesArguments) -> Result<protocol::VariablesResponseBody, DapError> {
        self.typed("variables", args).await
    }

    pub async fn evaluate(&self, args: protocol::EvaluateArguments) -> Result<protocol::EvaluateResponseBody, DapError> {
        self.typed("evaluate", args).await
    }

    pub async fn threads(&self) -> Result<protocol::ThreadsResponseBody, DapError> {
        let body = self.send_request("threads", None).await?;
        serde_json::from_value(body).map_err(|e| DapError::Serialization(e.to_string()))
    }

    pub async fn source(&self, args: protocol::SourceArguments) -> Result<protocol::SourceResponseBody, DapError> {
        self.typed("source", args).await
    }
}

async fn writer_loop<W: AsyncWrite + Unpin>(mut output: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if output.write_all(&frame).await.is_err() {
            break;
        }
        if output.flush().await.is_err() {
            break;
        }
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(
    mut frames: FrameReader<R>,
    pending: Arc<Mutex<HashMap<i64, PendingRequest>>>,
    events_tx: broadcast::Sender<ClientEvent>,
    closed: Arc<AtomicBool>,
) {
    loop {
        match frames.next_frame().await {
            Ok(Some(Frame::Message(value))) => handle_message(value, &pending, &events_tx),
            Ok(Some(Frame::ParseError(reason))) => {
                tracing::warn!(reason = %reason, "failed to decode DAP frame");
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "DAP transport read error");
                break;
            }
        }
    }

    if !closed.swap(true, Ordering::SeqCst) {
        let mut pending = pending.lock().unwrap();
        for (_, req) in pending.drain() {
            let _ = req.resolver.send(Err(DapError::ClientClosed));
        }
        drop(pending);
        let _ = events_tx.send(ClientEvent::Closed);
    }
}

fn handle_message(
    value: Value,
    pending: &Arc<Mutex<HashMap<i64, PendingRequest>>>,
    events_tx: &broadcast::Sender<ClientEvent>,
) {
    match value.get("type").and_then(Value::as_str) {
        Some("response") => handle_response(value, pending, events_tx),
        Some("event") => match serde_json::from_value::<protocol::Event>(value) {
            Ok(event) => {
                let _ = events_tx.send(ClientEvent::Dap(event));
            }
            Err(err) => tracing::warn!(error = %err, "malformed DAP event envelope"),
        },
        Some("request") => {
            tracing::debug!("ignoring reverse request (not answered by this core)");
        }
        other => tracing::warn!(kind = ?other, "unrecognized DAP message type"),
    }
}

fn handle_response(value: Value, pending: &Arc<Mutex<HashMap<i64, PendingRequest>>>, events_tx: &broadcast::Sender<ClientEvent>) {
    let Some(request_seq) = value.get("request_seq").and_then(Value::as_i64) else {
        tracing::warn!("response missing request_seq");
        return;
    };

    let entry = pending.lock().unwrap().remove(&request_seq);
    let Some(entry) = entry else {
        let _ = events_tx.send(ClientEvent::OrphanResponse(value));
        return;
    };

    let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
    let result = if success {
        Ok(value.get("body").cloned().unwrap_or(Value::Null))
    } else {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("DAP request '{}' failed", entry.command));
        Err(DapError::RequestFailed {
            command: entry.command.clone(),
            message,
        })
    };

    let _ = entry.resolver.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn resolves_a_successful_response() {
        let (client_input, mut adapter_output) = duplex(4096);
        let (adapter_input, client_output) = duplex(4096);
        let client = DapClient::spawn(client_input, client_output, Duration::from_secs(1));

        let responder = tokio::spawn(async move {
            let mut frames = FrameReader::new(adapter_input);
            let frame = frames.next_frame().await.unwrap().unwrap();
            let Frame::Message(req) = frame else { panic!("expected message") };
            assert_eq!(req["command"], "initialize");
            let response = serde_json::json!({
                "seq": 1, "type": "response", "request_seq": req["seq"],
                "success": true, "command": "initialize", "body": {"supportsConfigurationDoneRequest": true}
            });
            adapter_output.write_all(&encode_frame(&response).unwrap()).await.unwrap();
        });

        let caps = client
            .initialize(protocol::InitializeRequestArguments {
                adapter_id: "test".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(caps.supports_configuration_done_request, Some(true));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn failed_response_surfaces_message() {
        let (client_input, mut adapter_output) = duplex(4096);
        let (adapter_input, client_output) = duplex(4096);
        let client = DapClient::spawn(client_input, client_output, Duration::from_secs(1));

        tokio::spawn(async move {
            let mut frames = FrameReader::new(adapter_input);
            let frame = frames.next_frame().await.unwrap().unwrap();
            let Frame::Message(req) = frame else { panic!("expected message") };
            let response = serde_json::json!({
                "seq": 1, "type": "response", "request_seq": req["seq"],
                "success": false, "command": "evaluate", "message": "bad expression"
            });
            adapter_output.write_all(&encode_frame(&response).unwrap()).await.unwrap();
        });

        let err = client.send_request("evaluate", None).await.unwrap_err();
        match err {
            DapError::RequestFailed { message, .. } => assert_eq!(message, "bad expression"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_times_out_and_late_response_is_orphaned() {
        let (client_input, mut adapter_output) = duplex(4096);
        let (adapter_input, client_output) = duplex(4096);
        let client = DapClient::spawn(client_input, client_output, Duration::from_millis(50));
        let mut events = client.subscribe_events();

        let seq_rx = tokio::spawn(async move {
            let mut frames = FrameReader::new(adapter_input);
            let frame = frames.next_frame().await.unwrap().unwrap();
            let Frame::Message(req) = frame else { panic!("expected message") };
            req["seq"].as_i64().unwrap()
        });

        let err = client.send_request("threads", None).await.unwrap_err();
        assert!(matches!(err, DapError::RequestTimedOut { .. }));

        let seq = seq_rx.await.unwrap();
        let late = serde_json::json!({
            "seq": 2, "type": "response", "request_seq": seq,
            "success": true, "command": "threads", "body": {"threads": []}
        });
        adapter_output.write_all(&encode_frame(&late).unwrap()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, ClientEvent::OrphanResponse(_)));
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_requests() {
        let (client_input, _adapter_output) = duplex(4096);
        let (_adapter_input, client_output) = duplex(4096);
        let client = Arc::new(DapClient::spawn(client_input, client_output, Duration::from_secs(5)));

        let pending_client = client.clone();
        let pending = tokio::spawn(async move { pending_client.send_request("threads", None).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await;
        client.close().await; // idempotent

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(DapError::ClientClosed)));

        let result = client.send_request("threads", None).await;
        assert!(matches!(result, Err(DapError::ClientClosed)));
    }
}
