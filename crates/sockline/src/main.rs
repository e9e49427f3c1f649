//! # sockline
//!
//! Command-line client: opens one persistent connection, then either sends a
//! single request and prints the reply, or listens for pushes until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use sockline_client::{Connection, Dispatcher, LifecycleEvent, Reply, SendOptions};
use sockline_settings::{ClientSettings, loader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Persistent-socket protocol client.
#[derive(Parser, Debug)]
#[command(name = "sockline", about = "Persistent-socket protocol client")]
struct Cli {
    /// Endpoint host, optionally with a `ws://` or `wss://` scheme.
    #[arg(long)]
    host: Option<String>,

    /// Endpoint port.
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.sockline/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request and print the reply payload.
    Send {
        /// Request action.
        action: String,

        /// JSON payload.
        #[arg(long, default_value = "{}")]
        data: String,

        /// Reply timeout in milliseconds (overrides settings).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print pushes and connection state changes until Ctrl-C.
    Listen {
        /// Push action to print and answer with `{}`. Repeatable.
        #[arg(long = "action")]
        actions: Vec<String>,
    },
}

impl Cli {
    /// Settings from file and environment, then command-line overrides.
    fn load_settings(&self) -> Result<ClientSettings> {
        let path = self.settings.clone().unwrap_or_else(loader::settings_path);
        let mut settings = loader::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply_overrides(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut ClientSettings) {
        if let Some(host) = &self.host {
            settings.endpoint.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.endpoint.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
    }
}

/// Dispatcher that prints every push for `actions` and answers it.
fn printing_dispatcher(actions: &[String]) -> Dispatcher {
    actions.iter().fold(Dispatcher::new(), |dispatcher, action| {
        dispatcher.with(action, |push: Reply| async move {
            info!(session_id = %push.session_id(), action = push.action(), "push received");
            println!("{}", json!({"action": push.action(), "data": push.payload()}));
            if let Err(error) = push.end(json!({})) {
                warn!(%error, "failed to answer push");
            }
        })
    })
}

async fn send(
    connection: &Connection,
    action: &str,
    data: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let payload: Value = serde_json::from_str(data).context("--data is not valid JSON")?;

    let mut options = SendOptions::new().on_status(|status| debug!(%status, "delivery status"));
    if let Some(ms) = timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }

    let reply = connection
        .send_with(action, payload, options)
        .await
        .with_context(|| format!("Request {action} failed"))?;
    println!("{}", serde_json::to_string_pretty(reply.payload())?);
    Ok(())
}

async fn listen(connection: &Connection) -> Result<()> {
    let mut events = connection.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(LifecycleEvent::ConnectionState(up)) => {
                    println!("{}", json!({"connected": up}));
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle events dropped"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("Shutting down...");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: they carry the log level
    let settings = cli.load_settings()?;
    sockline_core::logging::init_subscriber(&settings.log_level);

    let dispatcher = match &cli.command {
        Command::Listen { actions } => printing_dispatcher(actions),
        Command::Send { .. } => Dispatcher::new(),
    };
    info!(url = %settings.endpoint.url(), "starting connection");
    let connection = Connection::builder(settings)
        .dispatcher(dispatcher)
        .build()
        .context("Failed to build connection")?;
    connection.start().context("Failed to start connection")?;

    let outcome = match &cli.command {
        Command::Send {
            action,
            data,
            timeout_ms,
        } => send(&connection, action, data, *timeout_ms).await,
        Command::Listen { .. } => listen(&connection).await,
    };

    let _ = connection.shutdown();
    outcome
}
