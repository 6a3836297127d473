//! A scripted stand-in for a real DAP adapter, used only by the end-to-end test in
//! `tests/end_to_end.rs`. Speaks just enough of the protocol (Content-Length framing,
//! `initialize`/`launch`/`setBreakpoints`/`configurationDone`/stepping/`evaluate`/
//! `scopes`/`variables`/`disconnect`) to drive a `DebugBackend` session through a
//! breakpoint stop and a step. Deliberately synchronous and std-only: it is a test
//! fixture, not part of the crate's async architecture.

use std::io::{self, Read, Write};
use std::time::Duration;

use serde_json::{json, Value};

struct Adapter<R, W> {
    input: R,
    output: W,
    next_seq: i64,
    program_path: Option<String>,
    current_line: i64,
    crash_on_next: bool,
}

fn main() {
    let crash_on_next = std::env::var("FAKE_ADAPTER_CRASH_ON_NEXT").is_ok();
    let mut adapter = Adapter {
        input: io::stdin(),
        output: io::stdout(),
        next_seq: 1,
        program_path: None,
        current_line: 1,
        crash_on_next,
    };
    adapter.run();
}

impl<R: Read, W: Write> Adapter<R, W> {
    fn run(&mut self) {
        loop {
            let Some(request) = self.read_message() else { break };
            if request.get("type").and_then(Value::as_str) != Some("request") {
                continue;
            }
            let seq = request.get("seq").and_then(Value::as_i64).unwrap_or(0);
            let command = request.get("command").and_then(Value::as_str).unwrap_or("").to_string();
            let arguments = request.get("arguments").cloned().unwrap_or(Value::Null);
            if !self.handle(seq, &command, &arguments) {
                break;
            }
        }
    }

    /// Returns `false` when the adapter should exit its read loop (clean shutdown or
    /// simulated crash).
    fn handle(&mut self, seq: i64, command: &str, arguments: &Value) -> bool {
        match command {
            "initialize" => {
                self.respond(seq, command, json!({"supportsConfigurationDoneRequest": true, "supportsVariableType": true}));
                std::thread::sleep(Duration::from_millis(20));
                self.send_event("initialized", Value::Null);
            }
            "launch" | "attach" => {
                if let Some(program) = arguments.get("program").and_then(Value::as_str) {
                    self.program_path = Some(program.to_string());
                }
                self.respond(seq, command, Value::Null);
            }
            "setBreakpoints" => {
                let lines: Vec<Value> = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .map(|bp| {
                        let line = bp.get("line").cloned().unwrap_or(Value::Null);
                        json!({"verified": true, "line": line})
                    })
                    .collect();
                if let Some(first) = arguments
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .and_then(|bps| bps.first())
                    .and_then(|bp| bp.get("line"))
                    .and_then(Value::as_i64)
                {
                    self.current_line = first;
                }
                self.respond(seq, command, json!({"breakpoints": lines}));
            }
            "setExceptionBreakpoints" | "setFunctionBreakpoints" => {
                self.respond(seq, command, json!({}));
            }
            "configurationDone" => {
                self.respond(seq, command, Value::Null);
                std::thread::sleep(Duration::from_millis(20));
                self.send_event("output", json!({"category": "stdout", "output": "starting up\n"}));
                self.send_event("stopped", json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true}));
            }
            "threads" => {
                self.respond(seq, command, json!({"threads": [{"id": 1, "name": "main"}]}));
            }
            "stackTrace" => {
                let source = self.program_path.as_deref().map(|p| {
                    let name = std::path::Path::new(p).file_name().map(|n| n.to_string_lossy().into_owned());
                    json!({"path": p, "name": name})
                });
                self.respond(
                    seq,
                    command,
                    json!({
                        "stackFrames": [{
                            "id": 501,
                            "name": "main",
                            "line": self.current_line,
                            "column": 1,
                            "source": source,
                        }],
                        "totalFrames": 1,
                    }),
                );
            }
            "scopes" => {
                self.respond(seq, command, json!({"scopes": [{"name": "Locals", "variablesReference": 1000}]}));
            }
            "variables" => {
                let reference = arguments.get("variablesReference").and_then(Value::as_i64).unwrap_or(0);
                let variables = if reference == 1000 { json!([{"name": "x", "value": "1"}]) } else { json!([]) };
                self.respond(seq, command, json!({"variables": variables}));
            }
            "evaluate" => {
                self.respond(seq, command, json!({"result": "42", "type": "int", "variablesReference": 0}));
            }
            "next" | "stepIn" | "stepOut" => {
                if self.crash_on_next {
                    self.flush();
                    std::process::exit(2);
                }
                self.respond(seq, command, Value::Null);
                self.current_line += 1;
                std::thread::sleep(Duration::from_millis(20));
                self.send_event("stopped", json!({"reason": "step", "threadId": 1, "allThreadsStopped": true}));
            }
            "continue" => {
                self.respond(seq, command, json!({"allThreadsContinued": true}));
                std::thread::sleep(Duration::from_millis(20));
                self.send_event("terminated", json!({}));
                return false;
            }
            "disconnect" | "terminate" => {
                self.respond(seq, command, Value::Null);
                return false;
            }
            _ => {
                self.respond(seq, command, Value::Null);
            }
        }
        true
    }

    fn respond(&mut self, request_seq: i64, command: &str, body: Value) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let message = json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_seq,
            "success": true,
            "command": command,
            "body": body,
        });
        self.write_message(&message);
    }

    fn send_event(&mut self, event: &str, body: Value) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let message = json!({"seq": seq, "type": "event", "event": event, "body": body});
        self.write_message(&message);
    }

    fn write_message(&mut self, value: &Value) {
        let body = serde_json::to_vec(value).expect("event/response bodies are always valid JSON");
        write!(self.output, "Content-Length: {}\r\n\r\n", body.len()).expect("stdout write");
        self.output.write_all(&body).expect("stdout write");
        self.flush();
    }

    fn flush(&mut self) {
        let _ = self.output.flush();
    }

    fn read_message(&mut self) -> Option<Value> {
        let mut header = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.input.read_exact(&mut byte).is_err() {
                return None;
            }
            header.push(byte[0]);
            if header.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        let header_text = String::from_utf8_lossy(&header);
        let content_length: usize = header_text.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok()).flatten()
        })?;
        let mut body = vec![0u8; content_length];
        self.input.read_exact(&mut body).ok()?;
        serde_json::from_slice(&body).ok()
    }
}

