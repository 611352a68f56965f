/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use lsp_types::{
    ClientCapabilities, ClientInfo, CodeActionClientCapabilities, CodeActionParams,
    CodeActionResponse, CompletionClientCapabilities, CompletionParams, CompletionResponse,
    Diagnostic, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentFormattingClientCapabilities, DocumentFormattingParams,
    GotoCapability, GotoDefinitionParams, GotoDefinitionResponse, Hover,
    HoverClientCapabilities, HoverParams, InitializeParams, InitializeResult, MarkupKind,
    PublishDiagnosticsClientCapabilities, ServerCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncClientCapabilities, TextEdit, Uri, VersionedTextDocumentIdentifier,
    WindowClientCapabilities, WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::descriptor::ServerDescriptor;
use super::error::ClientError;
use super::selector::DocumentSelector;
use super::session::ClientSession;
use super::state::{ClientEvent, ClientState, SessionEndReason};
use super::transport::Transport;

/// Default timeout for LSP requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the initialize handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the shutdown request and process exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

/// Behavioural options for a [`LanguageClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Documents in scope for the server.
    pub document_selector: DocumentSelector,
    /// Workspace root advertised to the server.
    pub root: Option<PathBuf>,
    /// Opaque options passed in `initialize`.
    pub initialization_options: Option<Value>,
    /// Bound on transport acquisition and the initialize round-trip.
    pub handshake_timeout: Duration,
    /// Bound on every other request.
    pub request_timeout: Duration,
    /// Bound on the shutdown request and on process exit afterwards.
    pub shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            document_selector: DocumentSelector::new(),
            root: None,
            initialization_options: None,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

/// A document lifecycle event coming from the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocumentEvent {
    /// Document uri; its scheme is checked against the selector.
    pub uri: Uri,
    /// Language identifier, e.g. `javascript`.
    pub language_id: String,
    /// Document version. Ignored on close.
    pub version: i32,
    /// Full document text. Ignored on close.
    pub text: String,
}

impl TextDocumentEvent {
    /// Creates an event with no content, enough for `did_close`.
    pub fn new(uri: Uri, language_id: impl Into<String>) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            version: 0,
            text: String::new(),
        }
    }

    /// Sets the version and full text.
    #[must_use]
    pub fn with_text(mut self, version: i32, text: impl Into<String>) -> Self {
        self.version = version;
        self.text = text.into();
        self
    }
}

/// State cell plus event channel. Cloned into the connection monitor.
#[derive(Clone)]
struct Lifecycle {
    id: Arc<str>,
    state: Arc<watch::Sender<ClientState>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Lifecycle {
    fn current(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Atomically moves to `to` if the current state is one of `from`.
    ///
    /// Returns the previous state, or the observed state on refusal.
    fn advance(&self, from: &[ClientState], to: ClientState) -> Result<ClientState, ClientState> {
        let mut outcome = Err(ClientState::Idle);
        self.state.send_if_modified(|current| {
            if from.contains(current) {
                outcome = Ok(*current);
                *current = to;
                true
            } else {
                outcome = Err(*current);
                false
            }
        });

        if let Ok(previous) = outcome {
            debug!("{}: {previous} -> {to}", self.id);
            self.emit(ClientEvent::StateChanged { from: previous, to });
        }
        outcome
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

type StopOutcome = Option<Result<(), ClientError>>;

/// Owns the lifecycle of one language server session.
pub struct LanguageClient {
    id: String,
    name: String,
    descriptor: ServerDescriptor,
    options: ClientOptions,
    lifecycle: Lifecycle,
    session: Arc<Mutex<Option<Arc<ClientSession>>>>,
    stop_outcome: Arc<watch::Sender<StopOutcome>>,
    open_documents: Arc<Mutex<HashMap<Uri, String>>>,
    server_info: Mutex<Option<InitializeResult>>,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LanguageClient {
    /// Creates an idle client. Nothing is launched until [`Self::start`].
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        descriptor: ServerDescriptor,
        options: ClientOptions,
    ) -> Self {
        let id = id.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ClientState::Idle);
        let (stop_outcome, _) = watch::channel(None);

        Self {
            lifecycle: Lifecycle {
                id: Arc::from(id.as_str()),
                state: Arc::new(state),
                events,
            },
            id,
            name: name.into(),
            descriptor,
            options,
            session: Arc::new(Mutex::new(None)),
            stop_outcome: Arc::new(stop_outcome),
            open_documents: Arc::new(Mutex::new(HashMap::new())),
            server_info: Mutex::new(None),
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    /// Client identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable client name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.lifecycle.current()
    }

    /// Returns true while a session is routing traffic.
    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// Subscribes to lifecycle, diagnostics and protocol-error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.lifecycle.events.subscribe()
    }

    /// Capabilities the server advertised in `initialize`.
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_info
            .lock()
            .await
            .as_ref()
            .map(|result| result.capabilities.clone())
    }

    /// Launches the server, performs the handshake and enters Running.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidState`] unless the client is Idle, including
    ///   while another `start()` is in flight.
    /// - [`ClientError::LaunchFailure`] if the transport cannot be acquired.
    /// - [`ClientError::HandshakeFailure`] if `initialize` fails or times out.
    ///
    /// On failure the client ends in Stopped.
    pub async fn start(&self) -> Result<InitializeResult, ClientError> {
        self.lifecycle
            .advance(&[ClientState::Idle], ClientState::Starting)
            .map_err(|state| ClientError::InvalidState {
                operation: "start",
                state,
            })?;

        info!(
            "Starting {} ({} over {})",
            self.name,
            self.descriptor.command(),
            self.descriptor.transport()
        );

        match self.establish().await {
            Ok((session, result)) => {
                let session = Arc::new(session);
                let closed = session.closed();
                {
                    let mut slot = self.session.lock().await;
                    *slot = Some(session);
                    let _ = self
                        .lifecycle
                        .advance(&[ClientState::Starting], ClientState::Running);
                }
                *self.server_info.lock().await = Some(result.clone());
                self.spawn_monitor(closed).await;
                info!("{} is running", self.name);
                Ok(result)
            }
            Err(e) => {
                warn!("Failed to start {}: {e}", self.name);
                let _ = self
                    .lifecycle
                    .advance(&[ClientState::Starting], ClientState::Stopped);
                // Nothing to shut down; stop() resolves Ok
                self.stop_outcome.send_replace(Some(Ok(())));
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(ClientSession, InitializeResult), ClientError> {
        let transport = Transport::connect(&self.descriptor, self.options.handshake_timeout).await?;
        let session = ClientSession::open(
            transport,
            self.lifecycle.events.clone(),
            self.options.request_timeout,
        );

        match session
            .initialize(self.initialize_params(), self.options.handshake_timeout)
            .await
        {
            Ok(result) => Ok((session, result)),
            Err(e) => {
                session.release(Duration::ZERO).await;
                Err(ClientError::handshake(&e))
            }
        }
    }

    fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            process_id: Some(std::process::id()),
            client_info: Some(ClientInfo {
                name: self.name.clone(),
                version: Some(env!("LANGCLIENT_VERSION").to_string()),
            }),
            capabilities: client_capabilities(),
            initialization_options: self.options.initialization_options.clone(),
            workspace_folders: self
                .options
                .root
                .as_deref()
                .and_then(workspace_folder)
                .map(|folder| vec![folder]),
            ..Default::default()
        }
    }

    /// Watches the session's transport and tears down on an unexpected close.
    async fn spawn_monitor(&self, mut closed: watch::Receiver<bool>) {
        let lifecycle = self.lifecycle.clone();
        let slot = self.session.clone();
        let documents = self.open_documents.clone();
        let stop_outcome = self.stop_outcome.clone();

        let handle = tokio::spawn(async move {
            if closed.wait_for(|closed| *closed).await.is_err() {
                return;
            }
            // stop() owns the teardown once it has left Running
            if lifecycle
                .advance(&[ClientState::Running], ClientState::Stopped)
                .is_err()
            {
                return;
            }

            warn!("{}: language server closed the connection", lifecycle.id);
            let session = slot.lock().await.take();
            if let Some(session) = session {
                session.release(Duration::ZERO).await;
            }
            documents.lock().await.clear();
            lifecycle.emit(ClientEvent::SessionEnded {
                reason: SessionEndReason::TransportClosed,
            });
            stop_outcome.send_replace(Some(Ok(())));
        });

        *self.monitor.lock().await = Some(handle);
    }

    /// Shuts the server down and releases the session.
    ///
    /// Safe to call from any state and from several tasks at once. The first
    /// caller out of Running spawns the teardown, and every caller then waits
    /// for its recorded outcome, so dropping a `stop()` future midway does
    /// not interrupt the shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ShutdownFailed`] if the server did not
    /// acknowledge `shutdown` or the `exit` notification could not be sent.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let mut state = self.lifecycle.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ClientState::Idle => return Ok(()),
                ClientState::Starting => {
                    let _ = state.wait_for(|s| *s != ClientState::Starting).await;
                }
                ClientState::Running => {
                    if self
                        .lifecycle
                        .advance(&[ClientState::Running], ClientState::Stopping)
                        .is_ok()
                    {
                        self.spawn_teardown();
                    }
                }
                ClientState::Stopping | ClientState::Stopped => {
                    return self.recorded_outcome().await;
                }
            }
        }
    }

    /// Runs the shutdown sequence on its own task and records the outcome.
    fn spawn_teardown(&self) {
        let name = self.name.clone();
        let lifecycle = self.lifecycle.clone();
        let slot = self.session.clone();
        let monitor = self.monitor.clone();
        let documents = self.open_documents.clone();
        let stop_outcome = self.stop_outcome.clone();
        let timeout = self.options.shutdown_timeout;

        tokio::spawn(async move {
            info!("Stopping {name}");

            let session = slot.lock().await.take();
            let outcome = match session {
                Some(session) => {
                    let result = session.shutdown(timeout).await;
                    session.release(timeout).await;
                    result.map_err(|e| ClientError::ShutdownFailed {
                        reason: e.to_string(),
                    })
                }
                None => Ok(()),
            };

            if let Some(handle) = monitor.lock().await.take() {
                handle.abort();
            }
            documents.lock().await.clear();

            if let Err(e) = &outcome {
                warn!("{name}: {e}");
            }

            let _ = lifecycle.advance(&[ClientState::Stopping], ClientState::Stopped);
            lifecycle.emit(ClientEvent::SessionEnded {
                reason: SessionEndReason::Stopped,
            });
            // Last, so every stop() caller resumes after the events above
            stop_outcome.send_replace(Some(outcome));
        });
    }

    /// Waits for whichever path into Stopped to record its outcome.
    async fn recorded_outcome(&self) -> Result<(), ClientError> {
        let mut outcome = self.stop_outcome.subscribe();
        match outcome.wait_for(Option::is_some).await {
            Ok(recorded) => (*recorded).clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        }
    }

    async fn running_session(
        &self,
        operation: &'static str,
    ) -> Result<Arc<ClientSession>, ClientError> {
        let state = self.lifecycle.current();
        if state != ClientState::Running {
            return Err(ClientError::InvalidState { operation, state });
        }

        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::InvalidState {
                operation,
                state: self.lifecycle.current(),
            })
    }

    fn is_selected(&self, document: &TextDocumentEvent) -> bool {
        let selected = self
            .options
            .document_selector
            .matches_document(&document.uri, &document.language_id);
        if !selected {
            debug!(
                "Not forwarding {} ({}): outside the document selector",
                document.uri.as_str(),
                document.language_id
            );
        }
        selected
    }

    /// Forwards `textDocument/didOpen` if the document is selected.
    ///
    /// Returns whether the notification was sent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] outside Running, or a transport
    /// error.
    pub async fn did_open(&self, document: TextDocumentEvent) -> Result<bool, ClientError> {
        let session = self.running_session("open a document").await?;
        if !self.is_selected(&document) {
            return Ok(false);
        }

        let TextDocumentEvent {
            uri,
            language_id,
            version,
            text,
        } = document;
        session
            .notify(
                "textDocument/didOpen",
                DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri: uri.clone(),
                        language_id: language_id.clone(),
                        version,
                        text,
                    },
                },
            )
            .await?;

        self.open_documents.lock().await.insert(uri, language_id);
        Ok(true)
    }

    /// Forwards a full-text `textDocument/didChange` if the document is
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] outside Running, or a transport
    /// error.
    pub async fn did_change(&self, document: TextDocumentEvent) -> Result<bool, ClientError> {
        let session = self.running_session("change a document").await?;
        if !self.is_selected(&document) {
            return Ok(false);
        }

        session
            .notify(
                "textDocument/didChange",
                DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier {
                        uri: document.uri,
                        version: document.version,
                    },
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: document.text,
                    }],
                },
            )
            .await?;
        Ok(true)
    }

    /// Forwards `textDocument/didClose` if the document is selected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] outside Running, or a transport
    /// error.
    pub async fn did_close(&self, document: TextDocumentEvent) -> Result<bool, ClientError> {
        let session = self.running_session("close a document").await?;
        if !self.is_selected(&document) {
            return Ok(false);
        }

        self.open_documents.lock().await.remove(&document.uri);
        session
            .notify(
                "textDocument/didClose",
                DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri: document.uri },
                },
            )
            .await?;
        Ok(true)
    }

    /// Sends a request about a document the client has forwarded.
    async fn document_request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        uri: &Uri,
        params: P,
    ) -> Result<R, ClientError> {
        let session = self.running_session("send a request").await?;
        if !self.open_documents.lock().await.contains_key(uri) {
            return Err(ClientError::DocumentNotSelected {
                uri: uri.as_str().to_string(),
            });
        }
        session.request(method, params).await
    }

    /// Gets hover information for a position in a document.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DocumentNotSelected`] for documents that were
    /// never forwarded, or the request error.
    pub async fn hover(&self, params: HoverParams) -> Result<Option<Hover>, ClientError> {
        let uri = params.text_document_position_params.text_document.uri.clone();
        self.document_request("textDocument/hover", &uri, params)
            .await
    }

    /// Gets completion suggestions at a position.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hover`].
    pub async fn completion(
        &self,
        params: CompletionParams,
    ) -> Result<Option<CompletionResponse>, ClientError> {
        let uri = params.text_document_position.text_document.uri.clone();
        self.document_request("textDocument/completion", &uri, params)
            .await
    }

    /// Gets the definition location for a symbol.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hover`].
    pub async fn definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>, ClientError> {
        let uri = params.text_document_position_params.text_document.uri.clone();
        self.document_request("textDocument/definition", &uri, params)
            .await
    }

    /// Gets code actions (quick fixes) for a range.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hover`].
    pub async fn code_actions(
        &self,
        params: CodeActionParams,
    ) -> Result<Option<CodeActionResponse>, ClientError> {
        let uri = params.text_document.uri.clone();
        self.document_request("textDocument/codeAction", &uri, params)
            .await
    }

    /// Formats an entire document.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hover`].
    pub async fn formatting(
        &self,
        params: DocumentFormattingParams,
    ) -> Result<Option<Vec<TextEdit>>, ClientError> {
        let uri = params.text_document.uri.clone();
        self.document_request("textDocument/formatting", &uri, params)
            .await
    }

    /// Diagnostics last published for a document.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] outside Running.
    pub async fn diagnostics(&self, uri: &Uri) -> Result<Vec<Diagnostic>, ClientError> {
        let session = self.running_session("read diagnostics").await?;
        Ok(session.diagnostics(uri).await.unwrap_or_default())
    }

    /// Waits until the server publishes diagnostics for `uri`, or until
    /// `timeout` elapses, and returns what is cached at that point.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] outside Running.
    pub async fn wait_for_diagnostics(
        &self,
        uri: &Uri,
        timeout: Duration,
    ) -> Result<Vec<Diagnostic>, ClientError> {
        let mut events = self.subscribe();
        let session = self.running_session("read diagnostics").await?;
        if let Some(cached) = session.diagnostics(uri).await {
            return Ok(cached);
        }

        let published = async {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Diagnostics { uri: published, .. }) if published == *uri => {
                        return true;
                    }
                    Ok(ClientEvent::SessionEnded { .. })
                    | Err(broadcast::error::RecvError::Closed) => return false,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        };
        if tokio::time::timeout(timeout, published).await.is_err() {
            debug!("No diagnostics for {} within {timeout:?}", uri.as_str());
        }

        Ok(session.diagnostics(uri).await.unwrap_or_default())
    }
}

impl Drop for LanguageClient {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.try_lock().ok().and_then(|mut m| m.take()) {
            handle.abort();
        }
    }
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                did_save: Some(false),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                ..Default::default()
            }),
            completion: Some(CompletionClientCapabilities::default()),
            definition: Some(GotoCapability::default()),
            code_action: Some(CodeActionClientCapabilities::default()),
            formatting: Some(DocumentFormattingClientCapabilities::default()),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            configuration: Some(true),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workspace_folder(root: &Path) -> Option<WorkspaceFolder> {
    let Ok(url) = url::Url::from_directory_path(root) else {
        warn!("Workspace root {} is not absolute, ignoring", root.display());
        return None;
    };
    let uri: Uri = match url.as_str().parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!("Invalid workspace root {}: {e}", root.display());
            return None;
        }
    };

    Some(WorkspaceFolder {
        uri,
        name: root
            .file_name()
            .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string()),
    })
}
