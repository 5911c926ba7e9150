use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roadbook_gate::config::GateConfig;
use roadbook_gate::http::{build_router, CorsPolicy, HttpServer, RateLimitGate};
use roadbook_gate::ratelimit::LimiterRegistry;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "roadbook-gate")]
#[command(about = "Per-client rate limiting front door for the roadbook API")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting roadbook gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Initialize the limiter registry
    let settings = config.rate_limiting.to_settings()?;
    info!(
        refill_rate = settings.refill_rate,
        burst_capacity = settings.burst_capacity,
        ttl_secs = settings.ttl.as_secs(),
        cleanup_interval_secs = settings.cleanup_interval.as_secs(),
        max_entries = settings.max_entries,
        "Rate limiter initialized"
    );
    let registry = Arc::new(LimiterRegistry::new(settings));

    let gate = RateLimitGate::new(registry)
        .trust_forwarded_headers(config.server.trust_forwarded_headers);
    let cors = CorsPolicy::new(config.server.allowed_origins.clone());
    let router = build_router(gate, cors);

    let server = HttpServer::bind(config.server.listen_addr, router).await?;

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Roadbook gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
