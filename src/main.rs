use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{BackendKind, LogFormat, LoggingConfig, TollgateConfig};
use tollgate::grpc::{GrpcServer, RateLimitInterceptor};
use tollgate::ratelimit::{
    connect, BucketStore, ConfigSource, Guard, InMemoryBucketStore, RedisBucketStore,
    RedisConfigStore, StaticConfigStore, SystemClock, UserConfig,
};

/// Per-identity token bucket admission control for gRPC services.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to serve gRPC on
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Bucket backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TollgateConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting Tollgate admission control service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        grpc_addr = %config.server.grpc_addr,
        backend = ?config.backend.kind,
        "Configuration loaded"
    );

    let limits = &config.limits;
    let default_limits = UserConfig::new(limits.default_rate, limits.default_capacity);

    let (store, configs): (Arc<dyn BucketStore>, Arc<dyn ConfigSource>) = match config.backend.kind {
        BackendKind::Redis => {
            let conn = connect(&config.backend)
                .await
                .with_context(|| format!("Redis unreachable at {}", config.backend.redis_url))?;
            let store =
                RedisBucketStore::with_clock(conn.clone(), Arc::new(SystemClock), limits.bucket_ttl_secs);
            let configs = RedisConfigStore::with_default(conn, default_limits);
            (
                Arc::new(store) as Arc<dyn BucketStore>,
                Arc::new(configs) as Arc<dyn ConfigSource>,
            )
        }
        BackendKind::Memory => {
            let store = Arc::new(InMemoryBucketStore::with_clock(
                Arc::new(SystemClock),
                limits.bucket_ttl_secs,
            ));
            let _purger = store
                .clone()
                .spawn_purger(Duration::from_secs(limits.purge_interval_secs.max(1)));

            let configs = match &limits.overrides_path {
                Some(path) => StaticConfigStore::from_file(path, default_limits)
                    .with_context(|| format!("Failed to load limit overrides from {}", path))?,
                None => StaticConfigStore::new(default_limits),
            };
            (
                store as Arc<dyn BucketStore>,
                Arc::new(configs) as Arc<dyn ConfigSource>,
            )
        }
    };
    info!("Bucket store initialized");

    let guard = Guard::with_timeout(store, config.backend.timeout());
    let interceptor = RateLimitInterceptor::new(guard, configs)
        .with_identity_header(config.server.identity_header.clone());

    let grpc_server = GrpcServer::new(config.server.grpc_addr, Arc::new(interceptor));

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
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
