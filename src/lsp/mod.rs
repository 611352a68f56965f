// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Lifecycle owner for one language server.
pub mod client;
/// Server launch descriptor.
pub mod descriptor;
/// Client error type.
pub mod error;
/// LSP message protocol definitions.
pub mod protocol;
/// Document selector.
pub mod selector;
/// Live connection and message routing.
pub mod session;
/// Client state and events.
pub mod state;
/// Transport acquisition.
pub mod transport;

pub use client::{ClientOptions, LanguageClient, TextDocumentEvent};
pub use descriptor::{ServerDescriptor, TransportKind};
pub use error::ClientError;
pub use selector::{DocumentFilter, DocumentSelector};
pub use state::{ClientEvent, ClientState, SessionEndReason};
