// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the pipe and socket transports.

use anyhow::{Result, anyhow};
use langclient::lsp::{
    ClientOptions, ClientState, DocumentFilter, LanguageClient, ServerDescriptor,
    TextDocumentEvent, TransportKind,
};
use lsp_types::Uri;
use std::time::Duration;

async fn round_trip(transport: TransportKind) -> Result<Vec<String>> {
    let dir = tempfile::tempdir()?;
    let record = dir.path().join("record.log");
    let record_arg = record.display().to_string();

    let descriptor = ServerDescriptor::new(env!("CARGO_BIN_EXE_mockls"), transport)?
        .with_args(["--record", record_arg.as_str()]);
    let options = ClientOptions {
        document_selector: [DocumentFilter::new("file", "javascript")]
            .into_iter()
            .collect(),
        root: Some(dir.path().to_path_buf()),
        handshake_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    };
    let client = LanguageClient::new("rome_lsp", "Language Server Rome", descriptor, options);

    client.start().await?;
    assert_eq!(client.state(), ClientState::Running);

    let path = dir.path().join("index.js");
    let url = url::Url::from_file_path(&path)
        .map_err(|()| anyhow!("not an absolute path: {}", path.display()))?;
    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e| anyhow!("invalid uri {url}: {e}"))?;
    let document = TextDocumentEvent::new(uri.clone(), "javascript").with_text(1, "var a;\n");
    assert!(client.did_open(document).await?);

    let diagnostics = client
        .wait_for_diagnostics(&uri, Duration::from_secs(10))
        .await?;
    assert_eq!(diagnostics.len(), 1);

    client.stop().await?;
    assert_eq!(client.state(), ClientState::Stopped);

    Ok(std::fs::read_to_string(&record)?
        .lines()
        .map(str::to_string)
        .collect())
}

#[cfg(unix)]
#[tokio::test]
async fn test_pipe_transport() -> Result<()> {
    let recorded = round_trip(TransportKind::Pipe).await?;
    assert_eq!(
        recorded,
        [
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "shutdown",
            "exit"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_socket_transport() -> Result<()> {
    let recorded = round_trip(TransportKind::Socket { port: 0 }).await?;
    assert_eq!(
        recorded,
        [
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "shutdown",
            "exit"
        ]
    );
    Ok(())
}
