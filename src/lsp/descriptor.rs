// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Server launch descriptor: how to obtain a running language server.

use std::fmt;

use super::error::ClientError;

/// Byte-stream channel used to talk to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawn the server and talk over its stdin/stdout.
    Stdio,
    /// Spawn the server with `--pipe=<path>` and accept its connection on a
    /// local domain socket.
    Pipe,
    /// Spawn the server with `--socket=<port>` and accept its TCP connection
    /// on the loopback interface. Port 0 picks a free port.
    Socket {
        /// Port to listen on.
        port: u16,
    },
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Pipe => f.write_str("pipe"),
            Self::Socket { port } => write!(f, "socket:{port}"),
        }
    }
}

/// Immutable description of the server executable and its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    command: String,
    args: Vec<String>,
    transport: TransportKind,
}

impl ServerDescriptor {
    /// Creates a descriptor for `command`.
    ///
    /// Only the command string is checked here; an executable that does not
    /// exist surfaces later as a launch failure from `start()`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidDescriptor`] if `command` is empty.
    pub fn new(command: impl Into<String>, transport: TransportKind) -> Result<Self, ClientError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ClientError::InvalidDescriptor(
                "server command must not be empty".to_string(),
            ));
        }

        Ok(Self {
            command,
            args: Vec::new(),
            transport,
        })
    }

    /// Adds arguments passed to the server before any transport flag.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The executable name or path.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments passed to the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Transport used to reach the server.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            ServerDescriptor::new("", TransportKind::Stdio),
            Err(ClientError::InvalidDescriptor(_))
        ));
        assert!(ServerDescriptor::new("   ", TransportKind::Pipe).is_err());
    }

    #[test]
    fn test_missing_executable_is_not_a_construction_error() -> Result<()> {
        let descriptor = ServerDescriptor::new("does-not-exist", TransportKind::Stdio)?;
        assert_eq!(descriptor.command(), "does-not-exist");
        assert_eq!(descriptor.transport(), TransportKind::Stdio);
        assert!(descriptor.args().is_empty());
        Ok(())
    }

    #[test]
    fn test_with_args() -> Result<()> {
        let descriptor = ServerDescriptor::new("rome_lsp", TransportKind::Socket { port: 0 })?
            .with_args(["--verbose", "--log=trace"]);
        assert_eq!(descriptor.args(), ["--verbose", "--log=trace"]);
        assert_eq!(descriptor.transport().to_string(), "socket:0");
        Ok(())
    }
}
