//! # parley-server
//!
//! Real-time direct-messaging server.
//!
//! This binary provides:
//! - **WebSocket endpoint** (`/ws`) carrying the JSON event protocol for
//!   presence, message delivery, read receipts and sidebar summaries
//! - **SQLite persistence** of conversations and messages via `parley-store`
//! - **REST API** (axum) for health checks, instance info and an
//!   admin presence view
//! - **Per-IP rate limiting** on HTTP, plus a per-connection event budget

mod api;
mod auth;
mod chat;
mod config;
mod error;
mod presence;
mod rate_limit;
mod registry;
mod repo_pool;
mod session;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_shared::constants::APP_NAME;
use parley_store::{ConversationRepository, Database};

use crate::api::AppState;
use crate::auth::TokenResolver;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::presence::PresenceService;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::repo_pool::RepositoryPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        frontend = config.frontend_url.as_deref().unwrap_or("*"),
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    let mut handles: Vec<Box<dyn ConversationRepository>> =
        Vec::with_capacity(config.database_pool_size);
    for _ in 0..config.database_pool_size {
        handles.push(Box::new(Database::open_at(&db_path)?));
    }
    info!(
        path = %db_path.display(),
        connections = handles.len(),
        "Database ready"
    );

    let chat = ChatService::new(
        RepositoryPool::new(handles),
        PresenceService::new(),
        ConnectionRegistry::new(),
    );

    let resolver = Arc::new(TokenResolver::new(config.token_issuer_pubkey));
    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let http_addr = config.http_addr;
    let app_state = AppState {
        chat,
        resolver: resolver.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Periodic session token cache cleanup (every 10 minutes)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            resolver.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server until it fails or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
