//! Standalone inspector server exposing echo targets.
//!
//! Every target echoes back each message it receives, which makes the binary
//! handy for poking at a debugger frontend or a client library.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin debugport-server
//! cargo run --bin debugport-server -- --host 0.0.0.0 --port 9230 --target main --target worker
//! ```

use std::sync::{Arc, OnceLock};

use clap::Parser;
use debugport_server::{ServerConfig, SessionId, SocketServer, SocketServerDelegate, ui::shutdown_signal};
use debugport_shared::logger::setup_logger;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "debugport-server")]
#[command(about = "Inspector server with echo debug targets", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = debugport_server::config::DEFAULT_HOST)]
    host: String,

    /// Port number to bind the server to (0 picks a free port)
    #[arg(short = 'p', long, default_value_t = debugport_server::config::DEFAULT_PORT)]
    port: u16,

    /// Title of a target to expose (repeatable)
    #[arg(short = 't', long = "target", default_value = "main")]
    targets: Vec<String>,
}

/// EchoTarget（エコーするデバッグターゲット）
struct EchoTarget {
    id: String,
    title: String,
}

/// Delegate that echoes every message back to its session.
struct EchoDelegate {
    targets: Vec<EchoTarget>,
    server: Arc<OnceLock<SocketServer>>,
}

impl EchoDelegate {
    fn new(titles: Vec<String>, server: Arc<OnceLock<SocketServer>>) -> Self {
        let targets = titles
            .into_iter()
            .map(|title| EchoTarget {
                id: Uuid::new_v4().to_string(),
                title,
            })
            .collect();
        Self { targets, server }
    }

    fn target(&self, id: &str) -> Option<&EchoTarget> {
        self.targets.iter().find(|target| target.id == id)
    }
}

impl SocketServerDelegate for EchoDelegate {
    fn start_session(&mut self, session_id: SessionId, target_id: &str) {
        let title = self.target(target_id).map_or("?", |target| target.title.as_str());
        tracing::info!("Session {} attached to '{}'", session_id, title);
    }

    fn end_session(&mut self, session_id: SessionId) {
        tracing::info!("Session {} detached", session_id);
    }

    fn message_received(&mut self, session_id: SessionId, message: &str) {
        tracing::debug!("Session {} sent: {}", session_id, message);
        if let Some(server) = self.server.get() {
            server.send(session_id, message);
        }
    }

    fn get_target_ids(&mut self) -> Vec<String> {
        self.targets.iter().map(|target| target.id.clone()).collect()
    }

    fn get_target_title(&mut self, id: &str) -> String {
        self.target(id)
            .map(|target| target.title.clone())
            .unwrap_or_default()
    }

    fn get_target_url(&mut self, id: &str) -> String {
        format!("echo://{id}")
    }

    fn server_done(&mut self) {
        tracing::info!("Inspector server done");
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(&[env!("CARGO_CRATE_NAME"), "tower_http"], "debug");

    let args = Args::parse();

    let handle = Arc::new(OnceLock::new());
    let delegate = EchoDelegate::new(args.targets, handle.clone());
    let server = SocketServer::new(
        delegate,
        &tokio::runtime::Handle::current(),
        ServerConfig::new(args.host, args.port),
    );
    let _ = handle.set(server.clone());

    if let Err(e) = server.start().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    shutdown_signal().await;
    server.shutdown().await;

    tracing::info!("Server shutdown complete");
}
