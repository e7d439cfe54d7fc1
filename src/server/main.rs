//! Amulet server binary.
//!
//! Loads configuration, connects to the store, applies migrations, seeds
//! defaults, and serves the client and admin APIs.

use std::net::SocketAddr;
use tracing::{info, Level};

use amulet::config::init_config;
use amulet::server::client_api::AppState;
use amulet::server::routes::build_router;
use amulet::server::store::Store;

fn log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = init_config().map_err(|e| {
        eprintln!("Configuration error: {e}");
        e
    })?;

    tracing_subscriber::fmt()
        .with_max_level(log_level(&config.logging.level))
        .init();

    info!("Starting amulet server (db={})", config.database.db_type);

    let store = Store::connect().await?;
    store.migrate().await?;
    store.ensure_defaults().await?;

    let app = build_router(AppState { store });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
