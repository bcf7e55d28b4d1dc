//! Demo server: loads `resources.json` from CONFIG_PATH, binds every resource to the chosen store,
//! creates the tables and mounts common and resource routes.
//!
//! Environment: STORE (memory|postgres), DATABASE_URL, DATA_API_SCHEMA, CONFIG_PATH, BIND_ADDR.

use axum::Router;
use data_api_sdk::{
    common_routes, load_from_path, resolve, resource_routes, AppState, DocumentStore,
    MemoryStore, PgDocumentStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("data_api_sdk=info")),
        )
        .init();

    let store: Arc<dyn DocumentStore> = match std::env::var("STORE").as_deref() {
        Ok("postgres") => {
            let database_url =
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/data_api".into());
            let schema = std::env::var("DATA_API_SCHEMA").unwrap_or_else(|_| "public".into());
            Arc::new(PgDocumentStore::connect(&database_url, schema, 5).await?)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "demos/config".into());
    let config = load_from_path(&config_path)?;
    let registry = resolve(&config, store)?.seal()?;
    registry.ensure_tables().await?;
    let state = AppState::new(registry);

    let app = Router::new()
        .merge(common_routes(state.clone()))
        .nest("/api/v1", resource_routes(state));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
