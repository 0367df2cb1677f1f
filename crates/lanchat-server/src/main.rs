//! lanchat: LAN chat server.
//!
//! Serves the browser client and chat API over HTTP while announcing this node
//! on the local network and tracking other chat nodes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lan_discovery::{PeerDiscovery, PeerId, UdpTransport};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanchat_server::{AppState, Config, MessageStore, router};

#[derive(Parser, Debug)]
#[command(name = "lanchat")]
#[command(about = "LAN chat server with peer discovery")]
struct Args {
    /// Path to the JSON config file (created with defaults if missing)
    #[arg(long, default_value = "lanchat.json", env = "LANCHAT_CONFIG")]
    config: PathBuf,

    /// HTTP port to listen on
    #[arg(long, env = "LANCHAT_PORT")]
    port: Option<u16>,

    /// HTTP address to bind to
    #[arg(long, env = "LANCHAT_BIND")]
    bind: Option<String>,

    /// File chat messages are persisted to
    #[arg(long, env = "LANCHAT_MESSAGES")]
    messages: Option<PathBuf>,

    /// Directory the browser client is served from
    #[arg(long, env = "LANCHAT_WEB_ROOT")]
    web_root: Option<PathBuf>,

    /// UDP port for peer discovery
    #[arg(long, env = "LANCHAT_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Peer ID (generated if not provided)
    #[arg(long, env = "LANCHAT_PEER_ID")]
    peer_id: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Command-line values take precedence over the config file.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(bind) = &self.bind {
            config.http.bind = bind.clone();
        }
        if let Some(messages) = &self.messages {
            config.storage.messages_file = messages.clone();
        }
        if let Some(web_root) = &self.web_root {
            config.web.root = web_root.clone();
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if let Some(peer_id) = &self.peer_id {
            config.peer_id = Some(peer_id.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,lanchat_server=debug,lan_discovery=debug,tower_http=debug"
    } else {
        "info,lanchat_server=info,lan_discovery=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    config
        .discovery
        .validate()
        .context("Invalid discovery configuration")?;

    let messages = MessageStore::open(&config.storage.messages_file)
        .with_context(|| format!("Failed to open message store {:?}", config.storage.messages_file))?;

    let transport = UdpTransport::new(config.discovery.broadcast_address);
    let discovery = match &config.peer_id {
        Some(id) => {
            let peer_id: PeerId = id.parse().context("Invalid peer ID")?;
            PeerDiscovery::with_peer_id(config.discovery.clone(), transport, peer_id)
        }
        None => PeerDiscovery::new(config.discovery.clone(), transport),
    };

    let addr = config.http.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;

    let state = Arc::new(AppState { messages, discovery });
    state.discovery.start();

    info!("Peer ID: {}", state.discovery.peer_id());
    info!("Serving web client from {:?}", config.web.root);
    info!("LAN chat running on http://{}", addr);

    let app = router(Arc::clone(&state), &config.web.root);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Joining the workers blocks for up to one receive timeout
    let stopping = Arc::clone(&state);
    tokio::task::spawn_blocking(move || stopping.discovery.stop()).await?;

    served?;
    info!("LAN chat shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
