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

//! Client lifecycle state and the events broadcast to subscribers.

use lsp_types::Uri;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a [`crate::lsp::LanguageClient`].
///
/// `Stopped` is terminal: a stopped client never returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// Constructed, never started.
    Idle,
    /// Transport being acquired or handshake in flight.
    Starting,
    /// Handshake complete, session routing traffic.
    Running,
    /// Shutdown sequence in flight.
    Stopping,
    /// Session released.
    Stopped,
}

impl ClientState {
    /// Lowercase name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// `stop()` tore the session down.
    Stopped,
    /// The transport dropped while the session was running.
    TransportClosed,
}

/// Events broadcast by a client to its subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The client moved between lifecycle states.
    StateChanged {
        /// Previous state.
        from: ClientState,
        /// New state.
        to: ClientState,
    },
    /// The session is gone.
    SessionEnded {
        /// What ended it.
        reason: SessionEndReason,
    },
    /// A malformed or unexpected message was received and dropped.
    ProtocolError {
        /// Description of the problem.
        message: String,
    },
    /// The server published diagnostics for a document.
    Diagnostics {
        /// Document the diagnostics belong to.
        #[serde(serialize_with = "serialize_uri")]
        uri: Uri,
        /// Number of diagnostics published.
        count: usize,
    },
}

fn serialize_uri<S: serde::Serializer>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(uri.as_str())
}
