//! Tote Master photo service.
//!
//! Every startup re-initializes storage and the tote database idempotently.
//! SIGTERM/SIGINT stop accepting connections and drain in-flight requests
//! for at most `server.shutdown_timeout` seconds.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use totemaster::config::{Config, LoggingConfig};
use totemaster::detection::DetectionClient;
use totemaster::pipeline::PhotoPipeline;
use totemaster::storage::create_object_store;
use totemaster::totes::{SqliteToteRepository, ToteRepository};

/// Command-line arguments for the photo service.
#[derive(Parser, Debug)]
#[command(
    name = "totemaster",
    version,
    about = "Tote photo storage and AI item detection service"
)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => totemaster::config::load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging);
    match &cli.config {
        Some(path) => info!(path = %path, "Configuration loaded"),
        None => info!("No configuration file given, using defaults"),
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        totemaster::metrics::init_metrics();
        totemaster::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Object storage.
    let store = create_object_store(&config.storage)?;
    store.initialize().await?;
    info!(
        backend = store.backend_name(),
        public_base_url = %config.storage.public_base_url,
        "Object storage initialized"
    );

    // Tote database.
    let db_path = &config.database.path;
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let totes: Arc<dyn ToteRepository> = Arc::new(SqliteToteRepository::new(db_path)?);
    info!(path = %db_path, "Tote database initialized");

    // Detection client and its health monitor.
    let detector = Arc::new(DetectionClient::from_config(&config.ai)?);
    info!(
        enabled = detector.is_enabled(),
        backend = detector.backend_name(),
        endpoint = %detector.endpoint(),
        "Detection client configured"
    );
    let health_monitor = detector.spawn_health_monitor();

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(totemaster::AppState {
        pipeline: PhotoPipeline::new(store, detector, totes),
        config,
    });
    let app = totemaster::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Tote Master listening");

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = drain_tx.send(());
            })
            .await
    };

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = drain_rx.await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!(timeout = ?shutdown_timeout, "In-flight requests did not finish in time");
        }
    }

    health_monitor.shutdown();
    info!("Tote Master shut down");
    Ok(())
}

/// `RUST_LOG` wins over `logging.level`; `logging.format` picks text or JSON.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
