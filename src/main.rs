//! # CodeMonkey server
//!
//! ```bash
//! # Run with default settings (codemonkey.db, port 8000)
//! codemonkey
//!
//! # Custom database and port
//! codemonkey --db practice.db --port 8080
//!
//! # Undo schema changes newer than version 6, then exit
//! codemonkey --rollback-to 6
//! ```
//!
//! ```bash
//! curl -X POST http://localhost:8000/v1/auth/signup \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "alice", "password": "correct-horse"}'
//!
//! curl http://localhost:8000/v1/questions
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use codemonkey::api::{create_router, AppState};
use codemonkey::auth::AuthService;
use codemonkey::config::{print_help, Config};
use codemonkey::db::Store;
use codemonkey::migrations;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env();
    if config.show_help {
        print_help();
        return Ok(());
    }

    let store = if config.in_memory {
        info!("Using in-memory database");
        Arc::new(Store::in_memory().await?)
    } else {
        info!("Using database file: {}", config.db_path);
        Arc::new(Store::new(&config.db_path).await?)
    };

    if let Some(target) = config.rollback_to {
        let reverted = migrations::rollback_to(&store, target).await?;
        info!("Reverted {} migration(s), schema is at version {}", reverted.len(), target);
        return Ok(());
    }
    migrations::run_pending(&store).await?;

    let jwt_secret = config
        .jwt_secret
        .clone()
        .map(String::into_bytes)
        .unwrap_or_else(|| {
            info!("Generating random JWT secret (set CODEMONKEY_JWT_SECRET to keep tokens valid across restarts)");
            AuthService::generate_secret()
        });

    let state = AppState::new(Arc::clone(&store), &config, jwt_secret);
    let app = create_router(state);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr()))?;
    info!("codemonkey listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shut down cleanly");
    Ok(())
}
