//! rtpf-server - Unix socket server for pattern-fragment queries
//!
//! Usage:
//!   rtpf-server --biolink-model biolink-model.yaml [--socket /tmp/rtpf.sock] [--metrics]
//!   rtpf-server --closures-from-store [--redis-host HOST] [--redis-port PORT]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio::net::{UnixListener, UnixStream};
use tracing_subscriber::EnvFilter;

use rtpf::config::{self, ServerConfig};
use rtpf::handler::{AppContext, RequestHandler};
use rtpf::metrics::{Metrics, SLOW_QUERY_THRESHOLD_MS};
use rtpf::protocol::{
    decode_request, encode_response, read_frame, write_frame, Request, Response, ResponseEnvelope,
};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Pattern-fragment query server
#[derive(Parser, Debug)]
#[command(name = "rtpf-server", version)]
#[command(about = "Serves one-hop query graphs from a pre-built Redis index")]
struct Args {
    /// JSON config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Biolink model YAML used to build the closures
    #[arg(long)]
    biolink_model: Option<PathBuf>,

    /// Use the closure snapshot stored by rtpf-load instead of a model file
    #[arg(long)]
    closures_from_store: bool,

    #[arg(long)]
    redis_host: Option<String>,

    #[arg(long)]
    redis_port: Option<u16>,

    #[arg(long)]
    redis_password: Option<String>,

    /// resource_id stamped on result analyses
    #[arg(long)]
    resource_id: Option<String>,

    /// Enable performance metrics collection
    #[arg(long)]
    metrics: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut cfg: ServerConfig = match &self.config {
            Some(path) => config::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(socket) = self.socket {
            cfg.socket_path = socket;
        }
        if let Some(model) = self.biolink_model {
            cfg.biolink_model = Some(model);
        }
        if let Some(host) = self.redis_host {
            cfg.store.host = host;
        }
        if let Some(port) = self.redis_port {
            cfg.store.port = port;
        }
        if let Some(password) = self.redis_password {
            cfg.store.password = Some(password);
        }
        if let Some(resource_id) = self.resource_id {
            cfg.resource_id = resource_id;
        }
        cfg.closures_from_store |= self.closures_from_store;
        cfg.metrics |= self.metrics;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config()?;

    let ctx = AppContext::from_config(&config)
        .await
        .context("initializing application context")?;
    tracing::info!(
        types = ctx.closures.type_count(),
        signatures = ctx.closures.signature_count(),
        "closures ready"
    );

    let metrics: Option<Arc<Metrics>> = if config.metrics {
        tracing::info!("metrics collection enabled");
        Some(Arc::new(Metrics::new()))
    } else {
        None
    };
    let handler = Arc::new(RequestHandler::new(Arc::new(ctx), metrics.clone()));

    // Remove stale socket file
    let _ = std::fs::remove_file(&config.socket_path);
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;
    tracing::info!("listening on {}", config.socket_path.display());

    install_signal_handler(config.socket_path.clone())?;

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let metrics = metrics.clone();
                let socket_path = config.socket_path.clone();
                tokio::spawn(async move {
                    handle_client(stream, handler, metrics, client_id, socket_path).await;
                });
            }
            Err(e) => tracing::warn!("accept error: {}", e),
        }
    }
}

/// SIGINT/SIGTERM: remove the socket file and exit.
fn install_signal_handler(socket_path: PathBuf) -> anyhow::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("registering signal handlers")?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!("received signal {}, exiting", sig);
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(0);
        }
    });
    Ok(())
}

async fn handle_client(
    mut stream: UnixStream,
    handler: Arc<RequestHandler>,
    metrics: Option<Arc<Metrics>>,
    client_id: usize,
    socket_path: PathBuf,
) {
    tracing::debug!("client {} connected", client_id);

    loop {
        let msg = match read_frame(&mut stream).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::debug!("client {} disconnected", client_id);
                break;
            }
            Err(e) => {
                tracing::warn!("client {} read error: {}", client_id, e);
                break;
            }
        };

        let envelope = match decode_request(&msg) {
            Ok(env) => env,
            Err(e) => {
                let response = ResponseEnvelope {
                    request_id: None,
                    response: Response::Error {
                        error: format!("Invalid request: {}", e),
                        code: "INVALID_REQUEST".to_string(),
                    },
                };
                if !send(&mut stream, &response, client_id).await {
                    break;
                }
                continue;
            }
        };

        let is_shutdown = matches!(envelope.request, Request::Shutdown);
        let op = RequestHandler::operation(&envelope.request);

        let start = Instant::now();
        let response = handler.handle_request(envelope.request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Some(m) = &metrics {
            m.record_request(op, duration_ms);
        }
        if duration_ms >= SLOW_QUERY_THRESHOLD_MS {
            tracing::warn!("slow {}: {}ms (client {})", op.name(), duration_ms, client_id);
        }

        let response = ResponseEnvelope { request_id: envelope.request_id, response };
        if !send(&mut stream, &response, client_id).await {
            break;
        }

        if is_shutdown {
            tracing::info!("shutdown requested by client {}", client_id);
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(0);
        }
    }
}

/// Serialize and write one response. `false` when the connection is gone.
async fn send(stream: &mut UnixStream, response: &ResponseEnvelope, client_id: usize) -> bool {
    let bytes = match encode_response(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("serialize error: {}", e);
            return true;
        }
    };
    if let Err(e) = write_frame(stream, &bytes).await {
        tracing::warn!("client {} write error: {}", client_id, e);
        return false;
    }
    true
}
