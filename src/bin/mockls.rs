// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout, or connects back
//! to the client with `--pipe=<path>` / `--socket=<port>`. CLI flags control
//! timing and failure modes, and `--record` appends every received method to
//! a file so tests can check the exact message order.
//! No tokio; uses `std::thread` for deferred notifications.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug, Default)]
#[command(name = "mockls")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Talk over stdin/stdout (the default).
    #[arg(long)]
    #[allow(dead_code, reason = "Accepted for command-line compatibility")]
    stdio: bool,

    /// Connect to the client's local domain socket at this path.
    #[arg(long, conflicts_with = "socket")]
    pipe: Option<PathBuf>,

    /// Connect to the client's loopback TCP listener on this port.
    #[arg(long)]
    socket: Option<u16>,

    /// Append each received method (or "response") to this file.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Emit progress begin/end after initialized (milliseconds).
    #[arg(long, default_value_t = 0)]
    indexing_delay: u64,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Exit abruptly when this method arrives (repeatable).
    #[arg(long)]
    crash_on: Vec<String>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,

    /// Send a response for a request id the client never used, after initialize.
    #[arg(long)]
    bogus_response: bool,

    /// Send a frame without Content-Length and a frame with a broken body,
    /// after initialize.
    #[arg(long)]
    garbage_frame: bool,

    /// Keep running after the exit notification.
    #[arg(long)]
    ignore_exit: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps stdout or a connected stream for
/// production, or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    writer: Writer,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            writer,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run the server, reading from the given reader until it closes.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method.clone() else {
            // A response to one of our own requests
            self.record("response");
            return;
        };
        self.record(&method);

        if self.args.crash_on.iter().any(|m| *m == method) {
            std::process::exit(1);
        }

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        // Check hang_on: never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        // Response delay
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        // Check fail_on: return `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response::failure(
                id,
                -32603,
                format!("mockls: configured to fail on {method}"),
            ));
            return;
        }

        let result = match method {
            "initialize" => Some(Self::handle_initialize()),
            "shutdown" => Some(Value::Null),
            "textDocument/hover" => self.handle_hover(&request.params),
            "textDocument/definition" => self.handle_definition(&request.params),
            "textDocument/completion" => self.handle_completion(&request.params),
            "textDocument/codeAction" | "textDocument/formatting" => Some(Value::Array(vec![])),
            _ => {
                self.send_response(&Response::failure(
                    id,
                    -32601,
                    format!("mockls: method not found: {method}"),
                ));
                return;
            }
        };

        self.send_response(&Response::success(id, result.unwrap_or(Value::Null)));

        if method == "initialize" {
            self.after_initialize();
        }
    }

    fn after_initialize(&self) {
        if self.args.send_configuration_request {
            self.send_configuration_request();
        }
        if self.args.bogus_response {
            send_message(
                &self.writer,
                &serde_json::json!({ "jsonrpc": "2.0", "id": 999_999, "result": null }),
            );
        }
        if self.args.garbage_frame {
            write_raw(&self.writer, b"Content-Type: application/json\r\n\r\n");
            write_framed(&self.writer, "{not json");
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if self.args.indexing_delay > 0 {
                    self.start_indexing_simulation();
                }
            }
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didChange" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    if let Some(text) = params
                        .get("contentChanges")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.last())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                    {
                        self.documents.insert(uri.to_string(), text.to_string());
                    }

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => {
                if !self.args.ignore_exit {
                    std::process::exit(0);
                }
            }
            // All others are silently accepted
            _ => {}
        }
    }

    fn handle_initialize() -> Value {
        serde_json::json!({
            "capabilities": {
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1
                },
                "hoverProvider": true,
                "definitionProvider": true,
                "completionProvider": { "triggerCharacters": ["."] },
                "codeActionProvider": true,
                "documentFormattingProvider": true
            },
            "serverInfo": { "name": "mockls", "version": "0.1.0" }
        })
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        Some(serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```\n{word}\n```")
            }
        }))
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let def_patterns = [
            format!("function {word}"),
            format!("let {word}"),
            format!("const {word}"),
            format!("var {word}"),
            format!("class {word}"),
        ];

        for (line_idx, line_text) in content.lines().enumerate() {
            for pattern in &def_patterns {
                if let Some(col_idx) = line_text.find(pattern.as_str()) {
                    return Some(location_json(
                        uri,
                        line_idx,
                        col_idx,
                        col_idx + pattern.len(),
                    ));
                }
            }
        }

        // Fall back to first occurrence
        for (line_idx, line_text) in content.lines().enumerate() {
            if let Some(col_idx) = line_text.find(&word) {
                return Some(location_json(uri, line_idx, col_idx, col_idx + word.len()));
            }
        }

        None
    }

    /// Offers every distinct identifier in the document.
    fn handle_completion(&self, params: &Value) -> Option<Value> {
        let (uri, _, _) = extract_position(params)?;
        let content = self.documents.get(uri)?;

        let mut words: Vec<&str> = content
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| w.chars().next().is_some_and(char::is_alphabetic))
            .collect();
        words.sort_unstable();
        words.dedup();

        let items: Vec<Value> = words
            .into_iter()
            .map(|w| serde_json::json!({ "label": w, "kind": 6 }))
            .collect();
        Some(serde_json::json!({ "isIncomplete": false, "items": items }))
    }

    fn publish_diagnostics(&self, uri: &str) {
        let delay = self.args.diagnostics_delay;
        let uri_owned = uri.to_string();
        let writer = self.writer.clone();

        if delay > 0 {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send_diagnostics_notification(&writer, &uri_owned);
            });
        } else {
            send_diagnostics_notification(&self.writer, &uri_owned);
        }
    }

    fn start_indexing_simulation(&self) {
        let delay = self.args.indexing_delay;
        let writer = self.writer.clone();
        let next_id = self.next_request_id.clone();

        std::thread::spawn(move || {
            let token = "mockls-indexing";

            let req_id = next_id.fetch_add(1, Ordering::SeqCst);
            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": req_id,
                    "method": "window/workDoneProgress/create",
                    "params": { "token": token }
                }),
            );

            std::thread::sleep(Duration::from_millis(50));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "begin", "title": "Indexing", "percentage": 0 }
                    }
                }),
            );

            std::thread::sleep(Duration::from_millis(delay));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "end", "message": "Indexing complete" }
                    }
                }),
            );
        });
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }, { "section": "editor" }] }
            }),
        );
    }

    fn send_response(&self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };
        write_framed(&self.writer, &json);
    }

    fn record(&self, entry: &str) {
        let Some(path) = &self.args.record else {
            return;
        };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{entry}");
        }
    }
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

/// Write bytes as-is.
fn write_raw(writer: &Writer, bytes: &[u8]) {
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(bytes);
    let _ = w.flush();
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `publishDiagnostics` notification.
fn send_diagnostics_notification(writer: &Writer, uri: &str) {
    send_message(
        writer,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": [{
                    "range": {
                        "start": { "line": 0, "character": 0 },
                        "end": { "line": 0, "character": 1 }
                    },
                    "severity": 2,
                    "source": "mockls",
                    "message": "mockls: mock diagnostic"
                }]
            }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

type Connection = (Box<dyn Read + Send>, Writer);

#[cfg(unix)]
fn connect_pipe(path: &Path) -> std::io::Result<Connection> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    let reader = stream.try_clone()?;
    Ok((Box::new(reader), Arc::new(Mutex::new(Box::new(stream)))))
}

#[cfg(not(unix))]
fn connect_pipe(path: &Path) -> std::io::Result<Connection> {
    Err(std::io::Error::other(format!(
        "pipe transport unsupported: {}",
        path.display()
    )))
}

fn connect_socket(port: u16) -> std::io::Result<Connection> {
    let stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    Ok((Box::new(reader), Arc::new(Mutex::new(Box::new(stream)))))
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let (mut reader, writer): Connection = if let Some(path) = &args.pipe {
        connect_pipe(path)?
    } else if let Some(port) = args.socket {
        connect_socket(port)?
    } else {
        (Box::new(std::io::stdin()), stdout_writer())
    };

    let mut server = MockServer::new(args, writer);
    server.run(&mut reader);
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        run_server_wait(args, input, 0)
    }

    fn run_server_wait(args: Args, input: &[u8], wait_ms: u64) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        std::thread::sleep(Duration::from_millis(wait_ms));
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn response_with_id(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id) && m.get("method").is_none())
            .expect("response with id")
    }

    fn initialize_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {},
                "rootUri": "file:///tmp/test"
            }
        })
        .to_string()
    }

    fn shutdown_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "shutdown"
        })
        .to_string()
    }

    fn did_open_notification(uri: &str, text: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "javascript",
                    "version": 1,
                    "text": text
                }
            }
        })
        .to_string()
    }

    fn position_request(id: u64, method: &str, uri: &str, line: u64, character: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }
        })
        .to_string()
    }

    #[test]
    fn test_initialize_response_valid() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(Args::default(), &input);

        assert!(!messages.is_empty(), "Expected at least one response");
        let resp = &messages[0];
        assert_eq!(resp["id"], 1);
        assert!(resp["error"].is_null(), "Expected no error");
        assert_eq!(resp["result"]["serverInfo"]["name"], "mockls");

        let caps = &resp["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["definitionProvider"], true);
        assert_eq!(caps["codeActionProvider"], true);
        assert_eq!(caps["documentFormattingProvider"], true);
        assert!(caps["completionProvider"].is_object());
    }

    #[test]
    fn test_hover_response_structure() {
        let uri = "file:///tmp/index.js";
        let text = "const answer = 42;\nconsole.log(answer);\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&position_request(2, "textDocument/hover", uri, 1, 14)));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(Args::default(), &input);

        let hover = response_with_id(&messages, 2);
        assert!(hover["error"].is_null(), "Expected no error");
        assert_eq!(hover["result"]["contents"]["kind"], "markdown");
        let value = hover["result"]["contents"]["value"].as_str().unwrap_or("");
        assert!(value.contains("answer"), "Expected 'answer' in hover content");
    }

    #[test]
    fn test_definition_response_structure() {
        let uri = "file:///tmp/index.js";
        let text = "function greet() {}\ngreet();\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&position_request(2, "textDocument/definition", uri, 1, 0)));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(Args::default(), &input);

        let def = response_with_id(&messages, 2);
        assert!(def["error"].is_null(), "Expected no error");
        assert_eq!(def["result"]["uri"], uri);
        assert_eq!(def["result"]["range"]["start"]["line"], 0);
    }

    #[test]
    fn test_completion_lists_identifiers() {
        let uri = "file:///tmp/index.js";
        let text = "let alpha = beta;\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, text)));
        input.extend(frame(&position_request(2, "textDocument/completion", uri, 0, 0)));

        let messages = run_server_with(Args::default(), &input);

        let completion = response_with_id(&messages, 2);
        let labels: Vec<&str> = completion["result"]["items"]
            .as_array()
            .expect("items array")
            .iter()
            .filter_map(|i| i["label"].as_str())
            .collect();
        assert_eq!(labels, ["alpha", "beta", "let"]);
    }

    #[test]
    fn test_diagnostics_notification_structure() {
        let uri = "file:///tmp/index.js";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification(uri, "var x = 1;\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(Args::default(), &input);

        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        let params = &diag["params"];
        assert_eq!(params["uri"], uri);
        let d = &params["diagnostics"][0];
        assert_eq!(d["severity"], 2);
        assert_eq!(d["source"], "mockls");
        assert!(
            d["message"]
                .as_str()
                .unwrap_or("")
                .contains("mock diagnostic")
        );
    }

    #[test]
    fn test_no_diagnostics_flag() {
        let args = Args {
            no_diagnostics: true,
            ..Args::default()
        };

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open_notification("file:///tmp/a.js", "x\n")));

        let messages = run_server_with(args, &input);
        assert!(
            messages
                .iter()
                .all(|m| m.get("method").and_then(Value::as_str)
                    != Some("textDocument/publishDiagnostics"))
        );
    }

    #[test]
    fn test_fail_on_and_hang_on() {
        let args = Args {
            fail_on: vec!["textDocument/hover".to_string()],
            hang_on: vec!["textDocument/definition".to_string()],
            ..Args::default()
        };
        let uri = "file:///tmp/a.js";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&position_request(2, "textDocument/hover", uri, 0, 0)));
        input.extend(frame(&position_request(3, "textDocument/definition", uri, 0, 0)));

        let messages = run_server_with(args, &input);

        assert_eq!(response_with_id(&messages, 2)["error"]["code"], -32603);
        assert!(
            !messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(3))
        );
    }

    #[test]
    fn test_unknown_method_not_found() {
        let input = frame(&position_request(
            7,
            "textDocument/references",
            "file:///tmp/a.js",
            0,
            0,
        ));
        let messages = run_server_with(Args::default(), &input);
        assert_eq!(response_with_id(&messages, 7)["error"]["code"], -32601);
    }

    #[test]
    fn test_after_initialize_extras() {
        let args = Args {
            send_configuration_request: true,
            bogus_response: true,
            ..Args::default()
        };

        let messages = run_server_with(args, &frame(&initialize_request(1)));

        let config = messages
            .iter()
            .find(|m| m.get("method").and_then(Value::as_str) == Some("workspace/configuration"))
            .expect("configuration request");
        assert_eq!(config["params"]["items"].as_array().map(Vec::len), Some(2));

        assert!(
            messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(999_999))
        );
    }

    #[test]
    fn test_progress_sequence() {
        let args = Args {
            indexing_delay: 100,
            ..Args::default()
        };

        let initialized = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        })
        .to_string();

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&initialized));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_wait(args, &input, 250);

        let has_create = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("window/workDoneProgress/create")
        });
        assert!(
            has_create,
            "Expected workDoneProgress/create. Got: {messages:?}"
        );

        let has_end = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("$/progress")
                && m["params"]["value"]["kind"] == "end"
        });
        assert!(has_end, "Expected $/progress end. Got: {messages:?}");
    }

    #[test]
    fn test_record_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = dir.path().join("record.log");
        let args = Args {
            record: Some(record.clone()),
            ..Args::default()
        };

        let initialized = serde_json::json!({ "jsonrpc": "2.0", "method": "initialized" }).to_string();
        let reply = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": null }).to_string();
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&initialized));
        input.extend(frame(&reply));
        input.extend(frame(&shutdown_request(2)));
        run_server_with(args, &input);

        let recorded = std::fs::read_to_string(&record).expect("record file");
        assert_eq!(
            recorded.lines().collect::<Vec<_>>(),
            ["initialize", "initialized", "response", "shutdown"]
        );
    }

    #[test]
    fn test_request_id_echo() {
        let init = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "initialize",
            "params": { "processId": null, "capabilities": {}, "rootUri": null }
        })
        .to_string();
        let shutdown = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "shutdown",
            "params": null
        })
        .to_string();

        let mut input = frame(&init);
        input.extend(frame(&shutdown));

        let messages = run_server_with(Args::default(), &input);

        assert_eq!(messages[0]["id"], 42, "Init should echo numeric id");

        let shutdown_resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_str) == Some("string-id"));
        assert!(shutdown_resp.is_some(), "Shutdown should echo string id");
    }
}
