// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the client lifecycle against mockls.
//!
//! mockls runs with `--record`, which appends every method it receives to a
//! file, so the tests can check exactly what reached the server.

use anyhow::{Context, Result, anyhow, bail};
use langclient::lsp::{
    ClientError, ClientEvent, ClientOptions, ClientState, DocumentFilter, LanguageClient,
    ServerDescriptor, SessionEndReason, TextDocumentEvent, TransportKind,
};
use lsp_types::{
    CodeActionContext, CodeActionParams, CompletionParams, CompletionResponse,
    DocumentFormattingParams, FormattingOptions, GotoDefinitionParams, GotoDefinitionResponse,
    HoverParams, PartialResultParams, Position, Range, TextDocumentIdentifier,
    TextDocumentPositionParams, Uri, WorkDoneProgressParams,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const SOURCE: &str = "const answer = 42;\nconsole.log(answer);\n";

struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    fn record_path(&self) -> std::path::PathBuf {
        self.dir.path().join("record.log")
    }

    fn descriptor(&self, extra: &[&str]) -> Result<ServerDescriptor> {
        let record = self.record_path().display().to_string();
        Ok(
            ServerDescriptor::new(env!("CARGO_BIN_EXE_mockls"), TransportKind::Stdio)?
                .with_args(["--record", record.as_str()])
                .with_args(extra.iter().copied()),
        )
    }

    fn client(&self, extra: &[&str]) -> Result<LanguageClient> {
        self.client_with(extra, options())
    }

    fn client_with(&self, extra: &[&str], options: ClientOptions) -> Result<LanguageClient> {
        Ok(LanguageClient::new(
            "rome_lsp",
            "Language Server Rome",
            self.descriptor(extra)?,
            options,
        ))
    }

    fn recorded(&self) -> Result<Vec<String>> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(std::fs::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn count(&self, method: &str) -> Result<usize> {
        Ok(self.recorded()?.iter().filter(|m| *m == method).count())
    }

    fn document(&self, name: &str, language_id: &str) -> Result<TextDocumentEvent> {
        let uri = file_uri(&self.dir.path().join(name))?;
        Ok(TextDocumentEvent::new(uri, language_id).with_text(1, SOURCE))
    }
}

fn options() -> ClientOptions {
    ClientOptions {
        document_selector: [
            DocumentFilter::new("file", "javascript"),
            DocumentFilter::new("file", "typescript"),
        ]
        .into_iter()
        .collect(),
        handshake_timeout: Duration::from_secs(10),
        request_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    }
}

fn file_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("not an absolute path: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("invalid uri {url}: {e}"))
}

fn hover_at(uri: Uri, line: u32, character: u32) -> HoverParams {
    HoverParams {
        text_document_position_params: position(uri, line, character),
        work_done_progress_params: WorkDoneProgressParams::default(),
    }
}

fn position(uri: Uri, line: u32, character: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri },
        position: Position::new(line, character),
    }
}

fn completion_at(uri: Uri, line: u32, character: u32) -> CompletionParams {
    CompletionParams {
        text_document_position: position(uri, line, character),
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    }
}

fn definition_at(uri: Uri, line: u32, character: u32) -> GotoDefinitionParams {
    GotoDefinitionParams {
        text_document_position_params: position(uri, line, character),
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }
}

fn code_actions_for(uri: Uri) -> CodeActionParams {
    CodeActionParams {
        text_document: TextDocumentIdentifier { uri },
        range: Range::new(Position::new(0, 0), Position::new(0, 5)),
        context: CodeActionContext {
            diagnostics: Vec::new(),
            only: None,
            trigger_kind: None,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }
}

fn formatting_for(uri: Uri) -> DocumentFormattingParams {
    DocumentFormattingParams {
        text_document: TextDocumentIdentifier { uri },
        options: FormattingOptions {
            tab_size: 2,
            insert_spaces: true,
            ..FormattingOptions::default()
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
    }
}

/// Drains every event already queued.
fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut matches: F,
) -> Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await?;
            if matches(&event) {
                return anyhow::Ok(event);
            }
        }
    })
    .await
    .context("timed out waiting for event")?
}

#[tokio::test]
async fn test_full_lifecycle_over_stdio() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    let mut events = client.subscribe();
    assert_eq!(client.state(), ClientState::Idle);

    let init = client.start().await?;
    assert_eq!(client.state(), ClientState::Running);
    assert!(client.is_running());
    assert_eq!(
        init.server_info.map(|info| info.name).as_deref(),
        Some("mockls")
    );
    let capabilities = client
        .server_capabilities()
        .await
        .context("no capabilities")?;
    assert!(capabilities.hover_provider.is_some());

    let document = harness.document("index.js", "javascript")?;
    let uri = document.uri.clone();
    assert!(client.did_open(document).await?);

    let diagnostics = client
        .wait_for_diagnostics(&uri, Duration::from_secs(10))
        .await?;
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("mock diagnostic"));

    let hover = client.hover(hover_at(uri, 0, 8)).await?;
    assert!(hover.is_some());

    client.stop().await?;
    assert_eq!(client.state(), ClientState::Stopped);

    assert_eq!(
        harness.recorded()?,
        [
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "textDocument/hover",
            "shutdown",
            "exit"
        ]
    );

    let transitions: Vec<(ClientState, ClientState)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        [
            (ClientState::Idle, ClientState::Starting),
            (ClientState::Starting, ClientState::Running),
            (ClientState::Running, ClientState::Stopping),
            (ClientState::Stopping, ClientState::Stopped),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_unselected_document_never_forwarded() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let document = harness.document("main.py", "python")?;
    let uri = document.uri.clone();
    assert!(!client.did_open(document).await?);

    let result = client.hover(hover_at(uri, 0, 0)).await;
    assert!(matches!(result, Err(ClientError::DocumentNotSelected { .. })));

    client.stop().await?;
    assert_eq!(harness.count("textDocument/didOpen")?, 0);
    assert_eq!(harness.count("textDocument/hover")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_change_and_close_forwarded() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let document = harness.document("index.ts", "typescript")?;
    let uri = document.uri.clone();
    assert!(client.did_open(document.clone()).await?);
    assert!(
        client
            .did_change(document.clone().with_text(2, "let changed = true;\n"))
            .await?
    );
    assert!(client.did_close(document).await?);

    // Closed documents are no longer eligible for requests
    let result = client.hover(hover_at(uri, 0, 4)).await;
    assert!(matches!(result, Err(ClientError::DocumentNotSelected { .. })));

    client.stop().await?;
    let recorded = harness.recorded()?;
    assert!(recorded.contains(&"textDocument/didChange".to_string()));
    assert!(recorded.contains(&"textDocument/didClose".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_launch_failure() -> Result<()> {
    let descriptor = ServerDescriptor::new("does-not-exist", TransportKind::Stdio)?;
    let client = LanguageClient::new("rome_lsp", "Language Server Rome", descriptor, options());

    let result = client.start().await;
    assert!(matches!(result, Err(ClientError::LaunchFailure { .. })));
    assert_eq!(client.state(), ClientState::Stopped);

    // Nothing was recorded, so stop has nothing to report
    client.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_initialize_error_is_handshake_failure() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--fail-on", "initialize"])?;

    let result = client.start().await;
    assert!(matches!(result, Err(ClientError::HandshakeFailure { .. })));
    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(harness.count("initialized")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_initialize_timeout_is_handshake_failure() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client_with(
        &["--hang-on", "initialize"],
        ClientOptions {
            handshake_timeout: Duration::from_millis(300),
            ..options()
        },
    )?;

    let Err(ClientError::HandshakeFailure { reason }) = client.start().await else {
        bail!("expected handshake failure");
    };
    assert!(reason.contains("timed out"), "{reason}");
    assert_eq!(client.state(), ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_start_rejected() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--response-delay", "100"])?;

    let (first, second) = tokio::join!(client.start(), client.start());
    let results = [first, second];

    let started = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(ClientError::InvalidState {
                    operation: "start",
                    ..
                })
            )
        })
        .count();
    assert_eq!((started, rejected), (1, 1));

    client.stop().await?;
    assert_eq!(harness.count("initialize")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_stop_shuts_down_once() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let (a, b, c) = tokio::join!(client.stop(), client.stop(), client.stop());
    a?;
    b?;
    c?;
    // A late caller gets the recorded outcome
    client.stop().await?;

    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(harness.count("shutdown")?, 1);
    assert_eq!(harness.count("exit")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_during_start_waits() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--response-delay", "200"])?;

    let (started, stopped) = tokio::join!(client.start(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.stop().await
    });
    started?;
    stopped?;

    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(harness.count("shutdown")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_failure_shared_by_all_callers() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--fail-on", "shutdown"])?;
    client.start().await?;

    let (first, second) = tokio::join!(client.stop(), client.stop());
    assert!(matches!(first, Err(ClientError::ShutdownFailed { .. })));
    assert!(matches!(second, Err(ClientError::ShutdownFailed { .. })));
    assert!(matches!(
        client.stop().await,
        Err(ClientError::ShutdownFailed { .. })
    ));

    assert_eq!(client.state(), ClientState::Stopped);
    // exit is still attempted
    assert_eq!(harness.count("exit")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_stop_still_completes() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client_with(
        &["--hang-on", "shutdown"],
        ClientOptions {
            shutdown_timeout: Duration::from_millis(500),
            ..options()
        },
    )?;
    client.start().await?;

    // The caller gives up while shutdown is unanswered
    let abandoned = tokio::time::timeout(Duration::from_millis(100), client.stop()).await;
    assert!(abandoned.is_err());

    let outcome = tokio::time::timeout(Duration::from_secs(5), client.stop())
        .await
        .context("second stop never resolved")?;
    assert!(matches!(outcome, Err(ClientError::ShutdownFailed { .. })));
    assert_eq!(client.state(), ClientState::Stopped);

    assert_eq!(harness.count("shutdown")?, 1);
    assert_eq!(harness.count("exit")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_server_ignoring_exit_is_killed() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client_with(
        &["--ignore-exit"],
        ClientOptions {
            shutdown_timeout: Duration::from_millis(300),
            ..options()
        },
    )?;
    client.start().await?;

    tokio::time::timeout(Duration::from_secs(5), client.stop()).await??;
    assert_eq!(client.state(), ClientState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_server_crash_ends_session() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--crash-on", "textDocument/didOpen"])?;
    client.start().await?;
    let mut events = client.subscribe();

    // The notification may or may not be written before the server dies
    let _ = client
        .did_open(harness.document("index.js", "javascript")?)
        .await;

    let ended = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::SessionEnded { .. })
    })
    .await?;
    assert!(matches!(
        ended,
        ClientEvent::SessionEnded {
            reason: SessionEndReason::TransportClosed
        }
    ));
    assert_eq!(client.state(), ClientState::Stopped);

    let document = harness.document("other.js", "javascript")?;
    assert!(matches!(
        client.did_open(document).await,
        Err(ClientError::InvalidState {
            state: ClientState::Stopped,
            ..
        })
    ));

    // No shutdown was attempted, so there is nothing to report
    client.stop().await?;
    assert_eq!(harness.count("shutdown")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_response_id_is_not_fatal() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--bogus-response"])?;
    let mut events = client.subscribe();
    client.start().await?;

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ClientEvent::ProtocolError { .. })
    })
    .await?;
    assert!(matches!(event, ClientEvent::ProtocolError { ref message } if message.contains("999999")));
    assert_eq!(client.state(), ClientState::Running);

    let document = harness.document("index.js", "javascript")?;
    let uri = document.uri.clone();
    assert!(client.did_open(document).await?);
    assert!(client.hover(hover_at(uri, 0, 8)).await?.is_some());

    client.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_are_not_fatal() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--garbage-frame"])?;
    let mut events = client.subscribe();
    client.start().await?;

    for _ in 0..2 {
        wait_for_event(&mut events, |e| {
            matches!(e, ClientEvent::ProtocolError { .. })
        })
        .await?;
    }
    assert!(client.is_running());

    client.stop().await?;
    assert_eq!(harness.count("shutdown")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_server_requests_are_answered() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&["--send-configuration-request", "--indexing-delay", "50"])?;
    client.start().await?;

    // workspace/configuration and window/workDoneProgress/create
    tokio::time::timeout(Duration::from_secs(10), async {
        while harness.count("response")? < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::Ok(())
    })
    .await
    .context("server requests were not answered")??;

    client.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_request_timeout_keeps_session() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client_with(
        &["--hang-on", "textDocument/hover"],
        ClientOptions {
            request_timeout: Duration::from_millis(300),
            ..options()
        },
    )?;
    client.start().await?;

    let document = harness.document("index.js", "javascript")?;
    let uri = document.uri.clone();
    client.did_open(document).await?;

    let result = client.hover(hover_at(uri.clone(), 0, 8)).await;
    assert!(matches!(result, Err(ClientError::RequestTimeout { .. })));
    assert!(client.is_running());
    assert_eq!(client.diagnostics(&uri).await?.len(), 1);

    client.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_completion_lists_identifiers() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let document = harness.document("index.js", "javascript")?;
    let uri = document.uri.clone();
    client.did_open(document).await?;

    let response = client
        .completion(completion_at(uri, 1, 4))
        .await?
        .context("no completion response")?;
    let CompletionResponse::List(list) = response else {
        bail!("expected a completion list, got {response:?}");
    };
    let labels: Vec<&str> = list.items.iter().map(|item| item.label.as_str()).collect();
    assert_eq!(labels, ["answer", "console", "const", "log"]);

    let unopened = harness.document("other.js", "javascript")?;
    let result = client.completion(completion_at(unopened.uri, 0, 0)).await;
    assert!(matches!(result, Err(ClientError::DocumentNotSelected { .. })));

    client.stop().await?;
    assert_eq!(harness.count("textDocument/completion")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_definition_resolves_declaration() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let document = harness.document("index.js", "javascript")?;
    let uri = document.uri.clone();
    client.did_open(document).await?;

    // `answer` inside console.log(answer)
    let response = client
        .definition(definition_at(uri.clone(), 1, 14))
        .await?
        .context("no definition")?;
    let GotoDefinitionResponse::Scalar(location) = response else {
        bail!("expected a single location, got {response:?}");
    };
    assert_eq!(location.uri, uri);
    assert_eq!(location.range.start, Position::new(0, 0));
    assert_eq!(location.range.end, Position::new(0, 12));

    let unopened = harness.document("other.js", "javascript")?;
    let result = client.definition(definition_at(unopened.uri, 0, 0)).await;
    assert!(matches!(result, Err(ClientError::DocumentNotSelected { .. })));

    client.stop().await?;
    assert_eq!(harness.count("textDocument/definition")?, 1);
    Ok(())
}

#[tokio::test]
async fn test_code_actions_and_formatting() -> Result<()> {
    let harness = Harness::new()?;
    let client = harness.client(&[])?;
    client.start().await?;

    let document = harness.document("index.ts", "typescript")?;
    let uri = document.uri.clone();
    client.did_open(document).await?;

    let actions = client.code_actions(code_actions_for(uri.clone())).await?;
    assert!(actions.is_some_and(|actions| actions.is_empty()));

    let edits = client.formatting(formatting_for(uri)).await?;
    assert!(edits.is_some_and(|edits| edits.is_empty()));

    let unopened = harness.document("other.ts", "typescript")?;
    assert!(matches!(
        client.code_actions(code_actions_for(unopened.uri.clone())).await,
        Err(ClientError::DocumentNotSelected { .. })
    ));
    assert!(matches!(
        client.formatting(formatting_for(unopened.uri)).await,
        Err(ClientError::DocumentNotSelected { .. })
    ));

    client.stop().await?;
    assert_eq!(harness.count("textDocument/codeAction")?, 1);
    assert_eq!(harness.count("textDocument/formatting")?, 1);
    Ok(())
}
