mod auth;
mod chat;
mod config;
mod db;
mod errors;
mod files;
mod handlers;
mod logging;
mod models;
mod server;
mod storage;
mod upload;
mod users;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::storage::s3::S3Gateway;
use crate::storage::ObjectStore;

#[derive(Parser, Debug)]
#[command(name = "mediahub", version, about = "Upload and chat-proxy HTTP backend")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "configs/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    logging::init(&config.logging);
    info!(path = %cli.config, "configuration loaded");

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = db::establish_connection(&config.database.path)
        .with_context(|| format!("failed to open database at {}", config.database.path))?;
    info!(path = %config.database.path, "database ready");

    let gateway = S3Gateway::new(&config.minio).await;
    gateway
        .ensure_bucket(&config.minio.bucket)
        .await
        .context("failed to prepare object store bucket")?;
    info!(bucket = %config.minio.bucket, "object store ready");

    let chat = chat::ChatClient::new(
        &config.chat.service_url,
        Duration::from_secs(config.chat.timeout_secs),
    )?;

    let state = Arc::new(server::AppState {
        users: users::UserStore::new(conn.clone()),
        files: files::FileStore::new(conn),
        storage: Arc::new(gateway),
        upload: upload::UploadPolicy::from_config(&config.upload),
        spool_dir: config.upload.spool_dir.clone(),
        chat,
    });

    let app = server::app(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
