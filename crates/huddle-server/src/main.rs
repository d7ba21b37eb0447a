//! # huddle-server
//!
//! Multi-tenant team chat & presence backend.
//!
//! This binary provides:
//! - **REST API** (axum) for chats, messages, membership and reactions
//! - **WebSocket gateway** with per-user and per-chat delivery rooms,
//!   recomputed from the store on every connect
//! - **Typed domain event bus** fanning out message, membership, read,
//!   typing and presence events to the right rooms
//! - **SQLite store** for chats, messages, membership and presence

mod api;
mod authorizer;
mod config;
mod error;
mod fanout;
mod gateway;
mod presence;
mod rooms;
mod service;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::fanout::EventFanout;
use crate::gateway::ChatGateway;
use crate::rooms::RoomRouter;
use crate::service::ChatService;

/// Store handle shared across components.  Each call site locks for the
/// duration of one store operation, which is also its suspension point.
pub type SharedDatabase = Arc<Mutex<Database>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting huddle server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let store: SharedDatabase = Arc::new(Mutex::new(database));

    let router = RoomRouter::new();
    let (fanout, events) = EventFanout::channel();
    let dispatcher = fanout::spawn_dispatcher(events, router.clone());

    let service = Arc::new(ChatService::new(store.clone(), fanout.clone()));
    let gateway = Arc::new(ChatGateway::new(
        store.clone(),
        service.clone(),
        router,
        fanout,
    ));

    let state = AppState {
        service,
        gateway,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Starting HTTP API server");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                dispatcher.abort();
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    dispatcher.abort();
    Ok(())
}
