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

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::lsp::{
    ClientError, ClientOptions, DocumentFilter, DocumentSelector, ServerDescriptor, TransportKind,
};

/// Server launched when nothing else is configured.
pub const DEFAULT_COMMAND: &str = "rome_lsp";

/// Top-level configuration, layered from defaults, files and environment.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// How to launch the language server.
    pub server: ServerConfig,

    /// Client identity, scope and timeouts.
    pub client: ClientConfig,
}

/// Transport named in configuration or on the command line.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportSetting {
    /// Server stdin/stdout.
    #[default]
    Stdio,
    /// Local domain socket (`--pipe=<path>`).
    Pipe,
    /// Loopback TCP (`--socket=<port>`).
    Socket,
}

/// The `[server]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// The command to execute (e.g., "rome_lsp")
    pub command: String,

    /// Arguments to pass to the command
    pub args: Vec<String>,

    /// Byte-stream channel to the server
    pub transport: TransportSetting,

    /// Port for the socket transport (0 picks a free port)
    pub port: u16,

    /// Initialization options to pass to the LSP server
    pub initialization_options: Option<serde_json::Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            args: Vec::new(),
            transport: TransportSetting::Stdio,
            port: 0,
            initialization_options: None,
        }
    }
}

impl ServerConfig {
    /// Builds the launch descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidDescriptor`] if the command is empty.
    pub fn descriptor(&self) -> Result<ServerDescriptor, ClientError> {
        let transport = match self.transport {
            TransportSetting::Stdio => TransportKind::Stdio,
            TransportSetting::Pipe => TransportKind::Pipe,
            TransportSetting::Socket => TransportKind::Socket { port: self.port },
        };
        Ok(ServerDescriptor::new(self.command.as_str(), transport)?
            .with_args(self.args.iter().cloned()))
    }
}

/// The `[client]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identifier
    pub id: String,

    /// Human-readable client name
    pub name: String,

    /// Workspace root advertised to the server
    pub root: Option<PathBuf>,

    /// Initialize handshake timeout in seconds (default: 30)
    pub handshake_timeout: u64,

    /// Request timeout in seconds (default: 30)
    pub request_timeout: u64,

    /// Shutdown timeout in seconds (default: 5)
    pub shutdown_timeout: u64,

    /// Documents forwarded to the server
    pub document_selector: Vec<DocumentFilter>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: "rome_lsp".to_string(),
            name: "Language Server Rome".to_string(),
            root: None,
            handshake_timeout: 30,
            request_timeout: 30,
            shutdown_timeout: 5,
            document_selector: vec![
                DocumentFilter::new("file", "javascript"),
                DocumentFilter::new("file", "typescript"),
            ],
        }
    }
}

impl Config {
    /// Converts to the client's runtime options.
    pub fn options(&self) -> ClientOptions {
        let client = &self.client;
        ClientOptions {
            document_selector: client
                .document_selector
                .iter()
                .cloned()
                .collect::<DocumentSelector>(),
            root: client.root.clone(),
            initialization_options: self.server.initialization_options.clone(),
            handshake_timeout: Duration::from_secs(client.handshake_timeout),
            request_timeout: Duration::from_secs(client.request_timeout),
            shutdown_timeout: Duration::from_secs(client.shutdown_timeout),
        }
    }

    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is unreadable or malformed.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let user_file = dirs::config_dir()
            .map(|dir| dir.join("langclient").join("config.toml"))
            .filter(|path| path.exists());
        Self::load_sources(user_file, explicit_file)
    }

    fn load_sources(user_file: Option<PathBuf>, explicit_file: Option<PathBuf>) -> Result<Self> {
        // 1. Defaults come from the serde defaults on each section
        let mut builder = config::Config::builder();

        // 2. Load from user config directory (~/.config/langclient/config.toml)
        if let Some(path) = user_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LANGCLIENT_CLIENT__REQUEST_TIMEOUT, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("LANGCLIENT")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
