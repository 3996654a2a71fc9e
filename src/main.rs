use anyhow::{Context, Result, bail};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    gateway::StorageGateway,
    s3_gateway::S3Gateway,
    session_registry::{InMemorySessionRegistry, SessionRegistry},
    sqlite_registry::SqliteSessionRegistry,
    sweeper::spawn_session_sweeper,
    upload_service::{UploadService, UploadSettings},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("upload_gateway=info,tower_http=info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        bucket = %cfg.bucket,
        region = %cfg.region,
        endpoint = ?cfg.endpoint_url,
        session_db = ?cfg.session_db,
        "Starting upload-gateway"
    );

    // --- Session registry ---
    let registry: Arc<dyn SessionRegistry> = match &cfg.session_db {
        Some(url) => {
            let sqlite = open_sqlite_registry(url).await?;
            if migrate {
                sqlite.migrate().await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(sqlite)
        }
        None if migrate => bail!("--migrate requires --session-db"),
        None => Arc::new(InMemorySessionRegistry::new()),
    };

    // --- Storage gateway (credentials resolved once, here) ---
    let gateway: Arc<dyn StorageGateway> = Arc::new(S3Gateway::from_config(&cfg).await);

    // --- Initialize core service ---
    let service = UploadService::new(gateway, registry, UploadSettings::from_config(&cfg));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_session_sweeper(service.clone(), cfg.sweep_interval(), shutdown.clone());

    // --- Build router ---
    let app: Router = routes::routes::app(service, &cfg.cors_origins);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!("session sweeper ended abnormally: {}", err);
    }
    tracing::info!("Server stopped; unfinished upload sessions in memory are abandoned");

    Ok(())
}

/// Connect to the SQLite session store, creating the file and its directory.
async fn open_sqlite_registry(url: &str) -> Result<SqliteSessionRegistry> {
    let db_path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing session database URL `{}`", url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", url))?;

    Ok(SqliteSessionRegistry::new(Arc::new(pool)))
}

/// Resolve on Ctrl+C or SIGTERM, then cancel background work.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received termination signal, shutting down");
    token.cancel();
}
