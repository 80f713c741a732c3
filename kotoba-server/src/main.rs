//! kotoba-server - Japanese reading and review API
//!
//! Configuration resolves CLI > environment > TOML file > compiled defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kotoba_common::auth::{load_or_create_token_secret, TokenSigner};
use kotoba_common::config::{locate_config_file, ConfigOverrides, ServerConfig, TomlConfig};
use kotoba_common::db::init_database;
use kotoba_server::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "kotoba-server")]
#[command(about = "Japanese reading and spaced-repetition review API")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "KOTOBA_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory (database, uploads)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Directory for uploaded books
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Frontend static files served under /static
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log level filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            data_dir: self.data_dir.clone(),
            database_path: self.database_path.clone(),
            upload_dir: self.upload_dir.clone(),
            static_dir: self.static_dir.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_file = locate_config_file(args.config.as_deref());
    let toml_config = TomlConfig::load_or_default(config_file.as_deref());
    let config = ServerConfig::resolve(&args.overrides(), &toml_config)
        .context("Invalid configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Build identification first, before any slow startup work
    info!(
        "Starting kotoba-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_file {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using environment and defaults"),
    }

    config
        .ensure_directories()
        .context("Failed to create data directories")?;
    info!("Data directory: {}", config.data_dir.display());
    info!("Upload directory: {}", config.upload_dir.display());

    let pool = init_database(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let secret = match &config.token_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("No token secret configured, using the secret stored in the database");
            load_or_create_token_secret(&pool)
                .await
                .context("Failed to load token signing secret")?
        }
    };
    let tokens = TokenSigner::new(secret, config.token_expiry_hours);

    let bind_address = config.bind_address();
    let state = AppState::new(pool, config, tokens);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;

    info!("kotoba-server listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
