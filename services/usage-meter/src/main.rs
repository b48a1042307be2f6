use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use investforge_usage_meter::{
    create_router, ApiState, CounterStore, MemoryCounterStore, SqliteCounterStore, StoreBackend,
    UsageMeter, UsageMeterConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = UsageMeterConfig::from_env()?;
    init_tracing(&config.log_level)?;

    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        store = ?config.store_backend,
        failure_policy = ?config.failure_policy,
        "starting usage-meter service"
    );

    let store: Arc<dyn CounterStore> = match config.store_backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteCounterStore::new(config.data_dir.clone()).with_context(|| {
                format!("opening usage store in {}", config.data_dir.display())
            })?,
        ),
        StoreBackend::Memory => Arc::new(MemoryCounterStore::new()),
    };

    let policy = Arc::new(config.load_policy()?);
    info!(plans = ?policy.plan_names(), "loaded plan policy");

    let meter = UsageMeter::new(store, policy).with_store_timeout(config.store_timeout());

    let state = Arc::new(ApiState::new(meter, config));
    let router = create_router(state);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("usage-meter service shutting down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
