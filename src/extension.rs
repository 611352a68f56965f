// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Activation entry points.
//!
//! The host calls [`Extension::activate`] once and [`Extension::deactivate`]
//! on teardown. The extension holds at most one client at a time.

use anyhow::{Result, bail};
use lsp_types::InitializeResult;
use tracing::info;

use crate::config::Config;
use crate::lsp::{ClientError, LanguageClient};

/// Host-facing owner of the active language client.
#[derive(Default)]
pub struct Extension {
    client: Option<LanguageClient>,
}

impl Extension {
    /// Creates an inactive extension.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a client from `config` and starts it.
    ///
    /// The client is kept even if it fails to start, so that
    /// [`Self::deactivate`] stays well-defined.
    ///
    /// # Errors
    ///
    /// Fails if a client is already active, if the configuration does not
    /// describe a usable server, or if the client fails to start.
    pub async fn activate(&mut self, config: &Config) -> Result<InitializeResult> {
        if let Some(client) = &self.client {
            bail!(
                "{} is already active ({}); deactivate it first",
                client.name(),
                client.state()
            );
        }

        let descriptor = config.server.descriptor()?;
        let client = LanguageClient::new(
            config.client.id.clone(),
            config.client.name.clone(),
            descriptor,
            config.options(),
        );
        info!("Activating {}", client.name());

        let client = self.client.insert(client);
        Ok(client.start().await?)
    }

    /// Stops and releases the active client.
    ///
    /// Returns `None` if nothing was ever activated.
    pub async fn deactivate(&mut self) -> Option<Result<(), ClientError>> {
        let client = self.client.take()?;
        info!("Deactivating {}", client.name());
        Some(client.stop().await)
    }

    /// The active client, if any.
    pub const fn client(&self) -> Option<&LanguageClient> {
        self.client.as_ref()
    }
}
