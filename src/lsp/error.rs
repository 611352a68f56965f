// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Errors surfaced by the language client.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::state::ClientState;

/// Errors returned by [`crate::lsp::LanguageClient`] and its session.
///
/// The type is `Clone` so that a single recorded `stop()` outcome can be
/// handed to every caller awaiting it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server executable could not be spawned or never connected.
    #[error("failed to launch language server '{command}': {reason}")]
    LaunchFailure {
        /// Command that was launched.
        command: String,
        /// What went wrong.
        reason: String,
        /// Underlying I/O error, when there is one.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// The transport opened but capability negotiation did not complete.
    #[error("initialize handshake failed: {reason}")]
    HandshakeFailure {
        /// What went wrong.
        reason: String,
    },

    /// A malformed frame, unknown response id, or unexpected message shape.
    #[error("protocol error: {message}")]
    ProtocolError {
        /// Description of the problem.
        message: String,
    },

    /// The underlying connection dropped.
    #[error("transport to language server closed")]
    TransportClosed,

    /// The operation is not valid in the client's current state.
    #[error("cannot {operation} while client is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the client was in.
        state: ClientState,
    },

    /// The server launch descriptor is unusable.
    #[error("invalid server descriptor: {0}")]
    InvalidDescriptor(String),

    /// The document is outside the document selector and was never forwarded.
    #[error("document {uri} is not selected for this language server")]
    DocumentNotSelected {
        /// Document uri.
        uri: String,
    },

    /// The server answered a request with an error response.
    #[error("'{method}' failed with LSP error {code}: {message}")]
    RequestFailed {
        /// Request method.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Server supplied message.
        message: String,
    },

    /// The server did not answer a request in time.
    #[error("'{method}' timed out after {timeout:?}")]
    RequestTimeout {
        /// Request method.
        method: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The shutdown sequence did not complete cleanly.
    #[error("shutdown failed: {reason}")]
    ShutdownFailed {
        /// What went wrong.
        reason: String,
    },
}

impl ClientError {
    /// Builds a [`ClientError::LaunchFailure`] from an I/O error.
    pub fn launch(command: &str, reason: impl Into<String>, source: io::Error) -> Self {
        Self::LaunchFailure {
            command: command.to_string(),
            reason: reason.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Builds a [`ClientError::HandshakeFailure`] wrapping another error.
    pub fn handshake(cause: &Self) -> Self {
        match cause {
            Self::HandshakeFailure { .. } | Self::LaunchFailure { .. } => cause.clone(),
            other => Self::HandshakeFailure {
                reason: other.to_string(),
            },
        }
    }

    /// Builds a [`ClientError::ProtocolError`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }
}
