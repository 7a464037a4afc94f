//! LTM Memory Server
//!
//! HTTP API for the memory system.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ltm_memory::{
    api::{self, AppState},
    AnthropicClient, ChatModel, Config, MemoryReconciler, MemoryStore, MemoryUpdater,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting LTM Memory Server on {}", config.bind_addr());
    tracing::info!("Database: {:?}", config.sqlite_path());

    let store = Arc::new(MemoryStore::new(&config)?);

    let state = match AnthropicClient::from_config(&config) {
        Ok(client) => {
            let client = Arc::new(client);
            tracing::info!("Completion model: {}", client.model());
            let reconciler = MemoryReconciler::from_config(client.clone(), &config);
            AppState {
                store: store.clone(),
                updater: Some(Arc::new(MemoryUpdater::new(store, reconciler))),
                chat_model: Some(client as Arc<dyn ChatModel>),
            }
        }
        Err(e) => {
            tracing::warn!("{}; /chat and merge endpoints disabled", e);
            AppState::store_only(store)
        }
    };

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("Server listening on http://{}", config.bind_addr());

    axum::serve(listener, app).await?;

    Ok(())
}
