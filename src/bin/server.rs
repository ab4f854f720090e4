//! Hostbridge MCP Server
//!
//! Run with: hostbridge-server [--transport stdio]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge::builtin::DiagnosticsTools;
use hostbridge::container::{ServiceContainer, Singleton};
use hostbridge::host::{HostContext, MainThreadExecutor};
use hostbridge::mcp::DispatcherFactory;
use hostbridge::session::{spawn_idle_sweeper, SessionManager};
use hostbridge::transport::{AppState, HttpServer, RequestSupervisor, StdioServer};
use hostbridge::types::*;

/// How long in-flight requests get to finish after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "hostbridge-server")]
#[command(about = "MCP tool server bridging AI agents to a host application")]
struct Args {
    /// Transport (http or stdio)
    #[arg(long, env = "HOSTBRIDGE_TRANSPORT", default_value = "http")]
    transport: TransportKind,

    /// Listen address for the HTTP transport
    #[arg(long, env = "HOSTBRIDGE_BIND", default_value = "127.0.0.1:8090")]
    bind: String,

    /// Idle time in seconds after which a session is swept
    #[arg(long, env = "HOSTBRIDGE_SESSION_IDLE_SECS", default_value = "1800")]
    session_idle_secs: u64,

    /// Interval between idle sweeps in seconds (0 = disabled)
    #[arg(long, env = "HOSTBRIDGE_SWEEP_INTERVAL_SECS", default_value = "60")]
    sweep_interval_secs: u64,

    /// Deadline for a single tool call in seconds
    #[arg(long, env = "HOSTBRIDGE_TOOL_TIMEOUT_SECS", default_value = "30")]
    tool_timeout_secs: u64,

    /// Maximum number of live sessions
    #[arg(long, env = "HOSTBRIDGE_MAX_SESSIONS", default_value = "256")]
    max_sessions: usize,

    /// Duplicate tool name policy (reject or last-wins)
    #[arg(long, env = "HOSTBRIDGE_DUPLICATE_TOOLS", default_value = "reject")]
    duplicate_tools: DuplicatePolicy,

    /// Name announced in serverInfo
    #[arg(long, env = "HOSTBRIDGE_SERVER_NAME", default_value = "hostbridge")]
    server_name: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "HOSTBRIDGE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            transport: self.transport,
            bind: self.bind.clone(),
            session_idle_secs: self.session_idle_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            tool_timeout_secs: self.tool_timeout_secs,
            max_sessions: self.max_sessions,
            duplicate_tools: self.duplicate_tools,
            identity: ServerIdentity {
                name: self.server_name.clone(),
                ..ServerIdentity::default()
            },
        }
    }
}

fn init_logging(json: bool) {
    // Logs go to stderr; stdout is for MCP protocol on the stdio transport
    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

/// Cancels `token` on Ctrl-C
fn watch_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = args.config();
    config.validate()?;

    // Services live for the whole run and are disposed in reverse order
    let container = Arc::new(ServiceContainer::new());
    container.register(
        Singleton::factory(|_| MainThreadExecutor::spawn("hostbridge-host")).disposable(),
    );
    container.add_tool(DiagnosticsTools::with_identity(config.identity.clone()));

    let executor = container
        .get_required_service::<MainThreadExecutor>()
        .context("starting host thread")?;
    let host = HostContext::new(executor);

    let factory = DispatcherFactory::new(container.clone(), host, config.clone());
    let sessions = Arc::new(SessionManager::new(factory));
    let supervisor = Arc::new(RequestSupervisor::new());

    let shutdown = CancellationToken::new();
    watch_ctrl_c(shutdown.clone());

    let sweeper = (config.sweep_interval_secs > 0).then(|| {
        tracing::info!(
            "Idle session sweeper started (interval: {}s, idle limit: {}s)",
            config.sweep_interval_secs,
            config.session_idle_secs
        );
        spawn_idle_sweeper(
            sessions.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            config.session_idle(),
            shutdown.clone(),
        )
    });

    match config.transport {
        TransportKind::Http => {
            let addr: SocketAddr = config
                .bind
                .parse()
                .with_context(|| format!("invalid bind address '{}'", config.bind))?;
            let state = AppState::new(sessions.clone(), supervisor.clone());
            let stop = shutdown.clone();
            HttpServer::new(state, addr)
                .start(async move { stop.cancelled().await })
                .await
                .context("HTTP server failed")?;
        }
        TransportKind::Stdio => {
            tracing::info!("MCP stdio server ready");
            StdioServer::new(sessions.clone(), supervisor.clone())
                .with_shutdown(shutdown.clone())
                .run()
                .await?;
        }
    }

    shutdown.cancel();
    if !supervisor.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("Abandoning unfinished requests");
    }
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    sessions.clear_all();
    container.dispose();
    tracing::info!("Server stopped");

    Ok(())
}
