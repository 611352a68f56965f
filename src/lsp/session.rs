// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The live connection to a language server.
//!
//! A [`ClientSession`] owns the transport for its whole life: the writer sits
//! behind a mutex shared with the reader task (which needs it to answer
//! server-to-client requests), and the reader half is owned by that task.

use bytes::BytesMut;
use lsp_types::{
    Diagnostic, InitializeParams, InitializeResult, InitializedParams, PublishDiagnosticsParams,
    Uri,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::error::ClientError;
use super::protocol::{
    self, IncomingMessage, METHOD_NOT_FOUND, NotificationMessage, RequestId, RequestMessage,
    ResponseMessage,
};
use super::state::ClientEvent;
use super::transport::{BoxedReader, BoxedWriter, Transport};

/// Cached diagnostics for each document, as last published by the server.
pub type DiagnosticsCache = Arc<Mutex<HashMap<Uri, Vec<Diagnostic>>>>;

type PendingTable = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;
type SharedWriter = Arc<Mutex<BoxedWriter>>;

/// A live, stateful connection to one server.
pub struct ClientSession {
    next_id: AtomicI64,
    writer: SharedWriter,
    pending: PendingTable,
    diagnostics: DiagnosticsCache,
    alive: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
    reader_handle: JoinHandle<()>,
}

impl ClientSession {
    /// Takes ownership of `transport` and starts routing inbound messages.
    ///
    /// Protocol errors and published diagnostics are broadcast on `events`.
    pub fn open(
        transport: Transport,
        events: broadcast::Sender<ClientEvent>,
        request_timeout: Duration,
    ) -> Self {
        let Transport {
            reader,
            writer,
            child,
        } = transport;

        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (closed_tx, closed) = watch::channel(false);

        let router = Router {
            writer: writer.clone(),
            pending: pending.clone(),
            diagnostics: diagnostics.clone(),
            alive: alive.clone(),
            closed: closed_tx,
            events,
        };
        let reader_handle = tokio::spawn(router.run(reader));

        Self {
            next_id: AtomicI64::new(1),
            writer,
            pending,
            diagnostics,
            alive,
            closed,
            request_timeout,
            child: Mutex::new(child),
            reader_handle,
        }
    }

    /// Sends a request and waits for its response with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`ClientSession::request_with_timeout`].
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, ClientError> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Sends a request and waits up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::TransportClosed`] if the connection is gone or drops
    ///   while waiting.
    /// - [`ClientError::RequestTimeout`] if no response arrives in time.
    /// - [`ClientError::RequestFailed`] if the server answers with an error.
    /// - [`ClientError::ProtocolError`] if the result has an unexpected shape.
    pub async fn request_with_timeout<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::TransportClosed);
        }

        let params = serde_json::to_value(params)
            .map_err(|e| ClientError::protocol(format!("failed to encode {method} params: {e}")))?;
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader clears the table after marking the session dead, so an
        // entry inserted after that clear would never be resolved.
        if !self.is_alive() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::TransportClosed);
        }

        let request = RequestMessage::new(id.clone(), method, params);
        if let Err(e) = write_message(&self.writer, &request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::TransportClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::RequestTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::RequestFailed {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        // Handle null/missing result - use JSON null as default
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| ClientError::protocol(format!("unexpected {method} result: {e}")))
    }

    /// Sends a notification. Notifications never enter the pending table.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TransportClosed`] if the connection is gone.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(ClientError::TransportClosed);
        }

        let params = serde_json::to_value(params)
            .map_err(|e| ClientError::protocol(format!("failed to encode {method} params: {e}")))?;
        write_message(&self.writer, &NotificationMessage::new(method, params)).await
    }

    /// Performs the `initialize` / `initialized` handshake.
    ///
    /// # Errors
    ///
    /// Returns the underlying request error; the caller classifies it as a
    /// handshake failure.
    pub async fn initialize(
        &self,
        params: InitializeParams,
        timeout: Duration,
    ) -> Result<InitializeResult, ClientError> {
        let result: InitializeResult = self
            .request_with_timeout("initialize", params, timeout)
            .await?;

        if let Some(info) = &result.server_info {
            debug!(
                "Initialized {} {}",
                info.name,
                info.version.as_deref().unwrap_or("")
            );
        }

        self.notify("initialized", InitializedParams {}).await?;
        Ok(result)
    }

    /// Sends the `shutdown` request followed by the `exit` notification.
    ///
    /// `exit` is attempted even when `shutdown` is not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns the first error of the two steps.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ClientError> {
        // shutdown response varies by server (null, true, etc.) - ignore result
        let ack = self
            .request_with_timeout::<_, Value>("shutdown", Value::Null, timeout)
            .await;
        let exit = self.notify("exit", Value::Null).await;
        ack?;
        exit
    }

    /// Releases the transport: waits up to `grace` for the server process to
    /// exit, kills it afterwards, and stops the reader task.
    pub async fn release(&self, grace: Duration) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            trace!("Closing writer failed: {e}");
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!("Language server exited with {status}"),
                Ok(Err(e)) => warn!("Failed to wait for language server: {e}"),
                Err(_) => {
                    if !grace.is_zero() {
                        warn!("Language server did not exit within {grace:?}, killing it");
                    }
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill language server: {e}");
                    }
                }
            }
        }

        self.reader_handle.abort();
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Returns true while the transport is connected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// A receiver that flips to `true` when the transport closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Gets cached diagnostics for a document.
    pub async fn diagnostics(&self, uri: &Uri) -> Option<Vec<Diagnostic>> {
        self.diagnostics.lock().await.get(uri).cloned()
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Reader-side state: routes every inbound message.
struct Router {
    writer: SharedWriter,
    pending: PendingTable,
    diagnostics: DiagnosticsCache,
    alive: Arc<AtomicBool>,
    closed: watch::Sender<bool>,
    events: broadcast::Sender<ClientEvent>,
}

impl Router {
    async fn run(self, mut reader: BoxedReader) {
        let mut buffer = BytesMut::with_capacity(8192);
        let mut temp = [0u8; 4096];

        'read: loop {
            match reader.read(&mut temp).await {
                Ok(0) => {
                    debug!("Language server closed the transport");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(e) => {
                    warn!("Error reading from language server: {e}");
                    break;
                }
            }

            loop {
                match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(body)) => self.dispatch(&body).await,
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        self.report(e.to_string());
                        break 'read;
                    }
                    Err(e) => self.report(e.to_string()),
                }
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        // Dropping the senders fails every in-flight request
        self.pending.lock().await.clear();
        self.closed.send_replace(true);
    }

    async fn dispatch(&self, body: &str) {
        trace!("Received LSP message: {body}");

        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                self.report(format!("invalid JSON: {e}"));
                return;
            }
        };

        match protocol::classify(value) {
            Ok(IncomingMessage::Response(response)) => self.route_response(response).await,
            Ok(IncomingMessage::Request(request)) => self.answer_server_request(&request).await,
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification).await;
            }
            Err(message) => self.report(message),
        }
    }

    async fn route_response(&self, response: ResponseMessage) {
        let Some(id) = response.id.clone() else {
            let detail = response
                .error
                .map_or_else(|| "no error".to_string(), |e| e.message);
            self.report(format!("response without id ({detail})"));
            return;
        };

        let sender = self.pending.lock().await.remove(&id);
        match sender {
            Some(sender) => {
                if sender.send(response).is_err() {
                    debug!("Requester for id {id} is gone");
                }
            }
            None => self.report(format!("response for unknown request id {id}")),
        }
    }

    async fn answer_server_request(&self, request: &RequestMessage) {
        debug!(
            "Received server request: {} (id: {})",
            request.method, request.id
        );

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "window/workDoneProgress/create"
            | "client/registerCapability"
            | "client/unregisterCapability" => ResponseMessage::success(id, Value::Null),
            "workspace/configuration" => {
                let items = request
                    .params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                ResponseMessage::success(id, Value::Array(vec![Value::Null; items]))
            }
            method => ResponseMessage::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method '{method}' not supported by client"),
            ),
        };

        if let Err(e) = write_message(&self.writer, &response).await {
            warn!("Failed to answer server request {}: {e}", request.method);
        }
    }

    async fn handle_notification(&self, notification: NotificationMessage) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(notification.params) {
                    Ok(params) => {
                        let count = params.diagnostics.len();
                        debug!("Received {count} diagnostics for {}", params.uri.as_str());
                        self.diagnostics
                            .lock()
                            .await
                            .insert(params.uri.clone(), params.diagnostics);
                        let _ = self.events.send(ClientEvent::Diagnostics {
                            uri: params.uri,
                            count,
                        });
                    }
                    Err(e) => self.report(format!("malformed publishDiagnostics: {e}")),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Some(message) = notification.params.get("message").and_then(Value::as_str)
                {
                    debug!("Language server: {message}");
                }
            }
            method => trace!("Ignoring notification: {method}"),
        }
    }

    fn report(&self, message: String) {
        warn!("Protocol error from language server: {message}");
        let _ = self.events.send(ClientEvent::ProtocolError { message });
    }
}

/// Writes one framed message.
async fn write_message<T: Serialize>(writer: &SharedWriter, message: &T) -> Result<(), ClientError> {
    let body = serde_json::to_string(message)
        .map_err(|e| ClientError::protocol(format!("failed to encode message: {e}")))?;
    trace!("Sending LSP message: {body}");

    let frame = protocol::encode_frame(&body);
    let mut writer = writer.lock().await;
    writer.write_all(&frame).await.map_err(|e| {
        debug!("Write to language server failed: {e}");
        ClientError::TransportClosed
    })?;
    writer.flush().await.map_err(|e| {
        debug!("Flush to language server failed: {e}");
        ClientError::TransportClosed
    })
}
