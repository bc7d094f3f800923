use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fleet_control::api::{self, nodes::AppState};
use fleet_control::db;
use fleet_control::services::node_registry::DEFAULT_DISCOVERY_FILE;
use fleet_control::services::{HttpTransport, NodeRegistry, RegistrySettings, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "fleet-control")]
#[command(about = "Registry and supervisor for remote daemon nodes", long_about = None)]
struct Args {
    /// Bind address for HTTP server
    #[arg(long, env = "FLEET_BIND", default_value = "0.0.0.0:23333")]
    bind: String,

    /// Database file path
    #[arg(long, env = "FLEET_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Config file a co-located daemon writes its key and port to
    #[arg(long, env = "FLEET_DISCOVERY_FILE", default_value = DEFAULT_DISCOVERY_FILE)]
    discovery_file: PathBuf,

    /// Seconds between supervisor passes over unavailable nodes
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    supervisor_interval_secs: u64,

    /// Seconds between local discovery attempts while the fleet is empty
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    discovery_retry_secs: u64,

    /// Seconds between keepalive pings to connected nodes
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    keepalive_secs: u64,

    /// Timeout for a single request to a node
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            discovery_file: self.discovery_file.clone(),
            supervisor_interval: Duration::from_secs(self.supervisor_interval_secs),
            discovery_retry: Duration::from_secs(self.discovery_retry_secs),
            keepalive: Duration::from_secs(self.keepalive_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting fleet control");

    // Initialize database
    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => db::default_db_path()?,
    };
    let pool = db::init_db(&db_path)?;

    let transport = HttpTransport::new(Duration::from_secs(args.connect_timeout_secs))?;

    // Restore the fleet and start supervising it
    let registry = NodeRegistry::init(
        Arc::new(SqliteStore::new(pool)),
        Arc::new(transport),
        args.registry_settings(),
    )
    .await
    .context("Failed to load node registry")?;

    let state = Arc::new(AppState {
        registry: registry.clone(),
    });

    let app = api::create_router(state);

    let addr: SocketAddr = args.bind.parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown();
    info!("Fleet control stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
