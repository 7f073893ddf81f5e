//! Datasync Server - Main entry point
//!
//! Serves the job routes without any processors. Applications register
//! theirs by embedding the `datasync_server` library.

use anyhow::Result;
use datasync_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use datasync_server::{
    api,
    config::Config,
    db::{self, InMemoryJobStore, JobStore, PgJobStore},
    storage,
    sync::{events::spawn_notification_listener, ProcessorRegistry, SyncContext, TokioDispatcher},
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig {
        log_file_prefix: "datasync-server".to_string(),
        filter_directives: Some("tower_http=debug,sqlx=warn,aws_config=warn".to_string()),
        ..LogConfig::default()
    };
    // environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    info!("Starting datasync server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store: Arc<dyn JobStore> = match config.database.url {
        Some(_) => {
            let pool = db::create_pool(&config.database).await?;
            let store = PgJobStore::new(pool);
            store.migrate().await?;
            info!("Database migrations completed");
            Arc::new(store)
        }
        None => Arc::new(InMemoryJobStore::new()),
    };

    let blobs = storage::from_config(&config.storage).await?;
    info!(backend = ?config.storage.backend, "Blob store initialized");

    let dispatcher = Arc::new(TokioDispatcher::new(config.dispatch.clone()));

    let registry = ProcessorRegistry::new();
    if registry.import_ids().next().is_none() && registry.export_ids().next().is_none() {
        warn!("No processors registered, import and export requests will be rejected; embed datasync_server to register processors");
    }

    let ctx = SyncContext::new(
        store,
        blobs,
        dispatcher.clone(),
        registry,
        config.sync_settings(),
    );
    let _notifications = spawn_notification_listener(&ctx.events);

    let state = api::AppState::new(ctx).with_max_upload_bytes(config.server.max_upload_bytes);
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for running jobs to drain", timeout.as_secs());
    if tokio::time::timeout(timeout, dispatcher.shutdown()).await.is_err() {
        warn!("Running jobs did not drain in time");
    }

    info!("Server shut down gracefully");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
