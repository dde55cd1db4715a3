//! Memory Ledger - conversational debt tracker
//!
//! A Rust backend that turns free-form chat messages into confirmed
//! mutations of a small obligation ledger, with an LLM extracting intent
//! and a state machine enforcing confirm-before-mutate.

mod api;
mod intent;
mod ledger;
mod llm;
mod orchestrator;
mod render;
mod session;
mod split;
mod state_machine;

use api::{create_router, AppState};
use intent::IntentExtractor;
use ledger::LedgerStore;
use llm::{LoggingService, OpenRouterService};
use orchestrator::Orchestrator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memory_ledger=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration
    let db_path = std::env::var("LEDGER_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.memory-ledger/ledger.db")
    });

    let port: u16 = std::env::var("LEDGER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("OPENROUTER_API_KEY not set — chat turns will fail until it is");
    }

    let model = std::env::var("LEDGER_LLM_MODEL")
        .unwrap_or_else(|_| "google/gemini-2.0-flash-exp".to_string());
    let base_url = std::env::var("OPENROUTER_BASE_URL").ok();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening ledger");
    let ledger = LedgerStore::open(&db_path)?;

    tracing::info!(model = %model, "Initializing intent extractor");
    let service = OpenRouterService::new(api_key, model, base_url.as_deref())?;
    let extractor = IntentExtractor::new(Arc::new(LoggingService::new(Arc::new(service))));

    let orchestrator = Orchestrator::new(ledger, extractor);
    let state = AppState::new(orchestrator);

    // Single user, local dashboard: CORS stays open
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Memory Ledger server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
