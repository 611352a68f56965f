// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Transport acquisition for a [`ServerDescriptor`].
//!
//! Every transport ends up as a boxed reader/writer pair so the session's
//! message routing stays transport agnostic. For `Pipe` and `Socket` the
//! client listens and the spawned server connects back, passing the endpoint
//! via `--pipe=<path>` or `--socket=<port>`.

use std::future::Future;
use std::io;
use std::process::Stdio;
#[cfg(unix)]
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::debug;

use super::descriptor::{ServerDescriptor, TransportKind};
use super::error::ClientError;

/// Read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(unix)]
static PIPE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An acquired byte stream to the server, plus the server process if we
/// spawned it.
pub struct Transport {
    /// Bytes from the server.
    pub reader: BoxedReader,
    /// Bytes to the server.
    pub writer: BoxedWriter,
    /// The spawned server process.
    pub child: Option<Child>,
}

impl Transport {
    /// Wraps an already connected stream pair. No process is owned.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Launches the server described by `descriptor` and connects to it.
    ///
    /// `connect_timeout` bounds how long a pipe or socket server may take to
    /// connect back.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::LaunchFailure`] if the executable cannot be
    /// spawned, exits before connecting, or never connects.
    pub async fn connect(
        descriptor: &ServerDescriptor,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        match descriptor.transport() {
            TransportKind::Stdio => connect_stdio(descriptor),
            TransportKind::Pipe => connect_pipe(descriptor, connect_timeout).await,
            TransportKind::Socket { port } => {
                connect_socket(descriptor, port, connect_timeout).await
            }
        }
    }
}

fn server_command(descriptor: &ServerDescriptor, transport_arg: Option<String>) -> Command {
    let mut command = Command::new(descriptor.command());
    command
        .args(descriptor.args())
        .args(transport_arg)
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    command
}

fn spawn(descriptor: &ServerDescriptor, mut command: Command) -> Result<Child, ClientError> {
    command.spawn().map_err(|e| {
        ClientError::launch(descriptor.command(), format!("spawn failed: {e}"), e)
    })
}

fn connect_stdio(descriptor: &ServerDescriptor) -> Result<Transport, ClientError> {
    let mut command = server_command(descriptor, None);
    command.stdin(Stdio::piped()).stdout(Stdio::piped());

    let mut child = spawn(descriptor, command)?;
    debug!(
        "Spawned {} (pid {:?}) over stdio",
        descriptor.command(),
        child.id()
    );

    let missing = |stream: &str| ClientError::LaunchFailure {
        command: descriptor.command().to_string(),
        reason: format!("{stream} not captured"),
        source: None,
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

#[cfg(unix)]
async fn connect_pipe(
    descriptor: &ServerDescriptor,
    connect_timeout: Duration,
) -> Result<Transport, ClientError> {
    use tokio::net::UnixListener;

    let path = std::env::temp_dir().join(format!(
        "langclient-{}-{}.sock",
        std::process::id(),
        PIPE_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path).map_err(|e| {
        ClientError::launch(
            descriptor.command(),
            format!("failed to bind pipe {}", path.display()),
            e,
        )
    })?;

    let mut command = server_command(descriptor, Some(format!("--pipe={}", path.display())));
    command.stdin(Stdio::null()).stdout(Stdio::inherit());
    let mut child = spawn(descriptor, command)?;
    debug!("Waiting for {} on pipe {}", descriptor.command(), path.display());

    let accepted = accept_connection(
        async { listener.accept().await.map(|(stream, _)| stream) },
        &mut child,
        descriptor.command(),
        connect_timeout,
    )
    .await;
    // The socket file is only needed until the server has connected.
    let _ = std::fs::remove_file(&path);

    let (reader, writer) = accepted?.into_split();
    Ok(Transport {
        reader: Box::new(reader),
        writer: Box::new(writer),
        child: Some(child),
    })
}

#[cfg(not(unix))]
async fn connect_pipe(
    descriptor: &ServerDescriptor,
    _connect_timeout: Duration,
) -> Result<Transport, ClientError> {
    Err(ClientError::LaunchFailure {
        command: descriptor.command().to_string(),
        reason: "pipe transport is only supported on unix".to_string(),
        source: None,
    })
}

async fn connect_socket(
    descriptor: &ServerDescriptor,
    port: u16,
    connect_timeout: Duration,
) -> Result<Transport, ClientError> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
        ClientError::launch(
            descriptor.command(),
            format!("failed to listen on port {port}"),
            e,
        )
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| ClientError::launch(descriptor.command(), "no local address", e))?
        .port();

    let mut command = server_command(descriptor, Some(format!("--socket={port}")));
    command.stdin(Stdio::null()).stdout(Stdio::inherit());
    let mut child = spawn(descriptor, command)?;
    debug!("Waiting for {} on port {port}", descriptor.command());

    let stream = accept_connection(
        async { listener.accept().await.map(|(stream, _)| stream) },
        &mut child,
        descriptor.command(),
        connect_timeout,
    )
    .await?;
    let _ = stream.set_nodelay(true);

    let (reader, writer) = stream.into_split();
    Ok(Transport {
        reader: Box::new(reader),
        writer: Box::new(writer),
        child: Some(child),
    })
}

/// Waits for the server to connect, racing its exit and the timeout.
async fn accept_connection<S>(
    accept: impl Future<Output = io::Result<S>>,
    child: &mut Child,
    command: &str,
    timeout: Duration,
) -> Result<S, ClientError> {
    let failure = |reason: String| ClientError::LaunchFailure {
        command: command.to_string(),
        reason,
        source: None,
    };

    tokio::select! {
        accepted = accept => accepted
            .map_err(|e| ClientError::launch(command, "failed to accept server connection", e)),
        status = child.wait() => Err(match status {
            Ok(status) => failure(format!("server exited before connecting ({status})")),
            Err(e) => ClientError::launch(command, "failed to wait for server", e),
        }),
        () = tokio::time::sleep(timeout) => {
            let _ = child.start_kill();
            Err(failure(format!("server did not connect within {timeout:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() -> Result<()> {
        let descriptor = ServerDescriptor::new("does-not-exist", TransportKind::Stdio)?;
        let result = Transport::connect(&descriptor, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(ClientError::LaunchFailure { ref command, .. }) if command == "does-not-exist"
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_server_exiting_early_is_launch_failure() -> Result<()> {
        // `true` ignores --socket and exits immediately without connecting
        let descriptor = ServerDescriptor::new("true", TransportKind::Socket { port: 0 })?;
        let result = Transport::connect(&descriptor, Duration::from_secs(5)).await;
        let Err(ClientError::LaunchFailure { reason, .. }) = result else {
            anyhow::bail!("expected launch failure");
        };
        assert!(reason.contains("exited before connecting"), "{reason}");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_server_never_connecting_times_out() -> Result<()> {
        // The trailing --pipe=<path> lands in $0 and is ignored
        let descriptor =
            ServerDescriptor::new("sh", TransportKind::Pipe)?.with_args(["-c", "sleep 5"]);
        let result = Transport::connect(&descriptor, Duration::from_millis(200)).await;
        let Err(ClientError::LaunchFailure { reason, .. }) = result else {
            anyhow::bail!("expected launch failure");
        };
        assert!(reason.contains("did not connect"), "{reason}");
        Ok(())
    }
}
