//! ptyhub - terminal session relay
//!
//! Listens for viewer WebSocket connections and gives each one a shell on a
//! pseudo-terminal. Sessions survive viewer disconnects for a grace period
//! and can be reattached by id.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ptyhub::{
    api,
    config::{self, ConfigError, RelayConfig},
    session::{SessionEvent, SessionRegistry},
    shutdown::ShutdownCoordinator,
};

/// ptyhub - terminal session relay
///
/// Serves `ws://<bind>/?id=<project>&cwd=<dir>&cmd=<command>&attach=<session>`
/// for browser terminal viewers.
#[derive(ClapParser, Debug)]
#[command(name = "ptyhub", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server (overrides the config file)
    #[arg(long, env = "PTYHUB_BIND")]
    bind: Option<SocketAddr>,

    /// Path to the TOML config file
    #[arg(long, env = "PTYHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds a session may stay without a viewer before it is killed
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Shell to spawn (overrides $SHELL)
    #[arg(long)]
    shell: Option<String>,

    /// Browser origin allowed to call the HTTP endpoints (repeatable)
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,
}

#[derive(Error, Debug)]
enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Cli {
    /// Merge command-line overrides into the file config.
    fn apply_to(self, mut config: RelayConfig) -> RelayConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if self.shell.is_some() {
            config.shell = self.shell;
        }
        if !self.cors_origins.is_empty() {
            config.cors_origins = self.cors_origins;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = cli.apply_to(RelayConfig::load_or_default(&config_path)?);
    tracing::debug!(path = %config_path.display(), ?config, "configuration loaded");

    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ptyhub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(config: RelayConfig) -> Result<(), RelayError> {
    tracing::info!("ptyhub starting");

    let sessions = SessionRegistry::with_settings(config.session_settings());
    let shutdown = ShutdownCoordinator::new();
    let state = api::AppState {
        sessions: sessions.clone(),
        shutdown: shutdown.clone(),
        default_command: config.default_command.clone(),
    };
    let app = api::router(
        state,
        api::RouterConfig {
            cors_origins: config.cors_origins.clone(),
        },
    );

    // The only fatal condition: the port is unavailable.
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| RelayError::Bind(config.bind, e))?;
    tracing::info!(addr = %config.bind, "HTTP/WS server listening");

    let monitor_handle = tokio::spawn(monitor_sessions(sessions.clone()));

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                server_shutdown_rx.await.ok();
            })
            .await
    });

    wait_for_signal().await;

    // Kill every shell before anything else; the registry refuses new
    // sessions from here on.
    sessions.shutdown().await;
    // Signal WebSocket handlers to send close frames
    shutdown.shutdown();
    // Give handlers a moment to flush close frames before stopping the server
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _ = server_shutdown_tx.send(());
    http_handle.await?.map_err(RelayError::Serve)?;
    monitor_handle.abort();

    tracing::info!(
        open_connections = shutdown.active_connections(),
        "ptyhub exiting"
    );
    Ok(())
}

/// Logs the live session count as sessions come and go.
async fn monitor_sessions(sessions: SessionRegistry) {
    let mut events = sessions.subscribe_events();
    loop {
        match events.recv().await {
            Ok(SessionEvent::Created { id, project_id }) => {
                tracing::debug!(session = %id, project = %project_id, live = sessions.len(), "session up");
            }
            Ok(SessionEvent::Destroyed { id }) => {
                let live = sessions.len();
                tracing::debug!(session = %id, live, "session down");
                if live == 0 {
                    tracing::info!("no live sessions");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session monitor lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(?e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(?e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
