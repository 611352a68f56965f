// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langclient command-line host.
//!
//! Activates the language client, opens the files given on the command line,
//! prints the diagnostics the server publishes for them, and deactivates.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use lsp_types::Uri;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use langclient::Extension;
use langclient::cli::{ColorConfig, format_diagnostic};
use langclient::config::{Config, TransportSetting};
use langclient::lsp::{ClientEvent, LanguageClient, TextDocumentEvent};

/// Command-line arguments for langclient.
#[derive(Parser, Debug)]
#[command(name = "langclient")]
#[command(about = "Minimal language client: launch a server, open files, report diagnostics")]
#[command(version = env!("LANGCLIENT_VERSION"))]
struct Args {
    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Language server executable. Overrides the config file.
    #[arg(long)]
    command: Option<String>,

    /// Argument passed to the server. Can be specified multiple times.
    #[arg(long = "arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Transport used to reach the server.
    #[arg(long, value_enum)]
    transport: Option<TransportSetting>,

    /// Port for the socket transport (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Workspace root (defaults to the current directory).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Stay resident and print diagnostics as they are published, until
    /// Ctrl-C or the server goes away.
    #[arg(long)]
    watch: bool,

    /// Disable colored output.
    #[arg(long)]
    nocolor: bool,

    /// Files to open.
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("langclient=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    run(&args, &config).await
}

/// Loads configuration and applies command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;

    if let Some(command) = &args.command {
        config.server.command.clone_from(command);
    }
    if !args.server_args.is_empty() {
        config.server.args.clone_from(&args.server_args);
    }
    if let Some(transport) = args.transport {
        config.server.transport = transport;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let root = match args.root.clone().or_else(|| config.client.root.clone()) {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    config.client.root = Some(
        root.canonicalize()
            .with_context(|| format!("Invalid workspace root: {}", root.display()))?,
    );

    Ok(config)
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    let colors = ColorConfig::new(args.nocolor);
    let mut extension = Extension::new();

    let result = match extension.activate(config).await {
        Ok(init) => {
            if let Some(info) = init.server_info {
                info!(
                    "Connected to {} {}",
                    info.name,
                    info.version.unwrap_or_default()
                );
            }
            match extension.client() {
                Some(client) => report(client, args, config, &colors).await,
                None => Err(anyhow!("client missing after activation")),
            }
        }
        Err(e) => Err(e),
    };

    if let Some(Err(e)) = extension.deactivate().await {
        warn!("{e}");
    }
    result
}

/// Opens the files and prints their diagnostics.
async fn report(
    client: &LanguageClient,
    args: &Args,
    config: &Config,
    colors: &ColorConfig,
) -> Result<()> {
    // Subscribe before opening so no publication is missed in watch mode
    let events = client.subscribe();
    let mut opened: HashMap<Uri, String> = HashMap::new();
    let mut languages: HashMap<Uri, String> = HashMap::new();

    for path in &args.files {
        let display = path.display().to_string();
        let (uri, document) = load_document(path).await?;
        let language_id = document.language_id.clone();
        if client.did_open(document).await? {
            languages.insert(uri.clone(), language_id);
            opened.insert(uri, display);
        } else {
            println!("{}", colors.dim(&format!("{display}: not handled by this server")));
        }
    }

    if args.watch {
        return watch(client, events, &opened, colors).await;
    }

    let timeout = Duration::from_secs(config.client.request_timeout);
    for (uri, display) in &opened {
        let diagnostics = client.wait_for_diagnostics(uri, timeout).await?;
        if diagnostics.is_empty() {
            println!("{}", colors.dim(&format!("{display}: no diagnostics")));
        }
        for diagnostic in &diagnostics {
            println!("{}", format_diagnostic(display, diagnostic, colors));
        }
    }

    for (uri, language_id) in languages {
        client
            .did_close(TextDocumentEvent::new(uri, language_id))
            .await?;
    }
    Ok(())
}

async fn watch(
    client: &LanguageClient,
    mut events: broadcast::Receiver<ClientEvent>,
    opened: &HashMap<Uri, String>,
    colors: &ColorConfig,
) -> Result<()> {
    info!("Watching for diagnostics, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(ClientEvent::Diagnostics { uri, .. }) => {
                    let display = opened
                        .get(&uri)
                        .cloned()
                        .unwrap_or_else(|| uri.as_str().to_string());
                    for diagnostic in client.diagnostics(&uri).await? {
                        println!("{}", format_diagnostic(&display, &diagnostic, colors));
                    }
                }
                Ok(ClientEvent::SessionEnded { reason }) => {
                    warn!("Session ended: {reason:?}");
                    return Ok(());
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn load_document(path: &Path) -> Result<(Uri, TextDocumentEvent)> {
    let absolute = path
        .canonicalize()
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let text = tokio::fs::read_to_string(&absolute)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;

    let url = url::Url::from_file_path(&absolute)
        .map_err(|()| anyhow!("Cannot build a file uri for {}", absolute.display()))?;
    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e| anyhow!("Invalid uri {url}: {e}"))?;

    let document = TextDocumentEvent::new(uri.clone(), language_id_for(&absolute)).with_text(1, text);
    Ok((uri, document))
}

/// Maps a file extension to an LSP language identifier.
fn language_id_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("json") => "json",
        Some("py") => "python",
        Some("rs") => "rust",
        _ => "plaintext",
    }
}
