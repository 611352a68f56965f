// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langclient is a minimal language client for a single language server.
//!
//! It launches the server over stdio, a local pipe or a loopback socket,
//! negotiates the `initialize` handshake, forwards only the documents its
//! selector covers, and guarantees the `shutdown` / `exit` sequence runs once.

/// Command-line output helpers.
pub mod cli;
/// Configuration handling for the server and client.
pub mod config;
/// Host activation entry points.
pub mod extension;
/// LSP client implementation.
pub mod lsp;

pub use extension::Extension;
