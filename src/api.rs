//! HTTP API
//!
//! The inbound chat channel plus the dashboard REST surface over the
//! ledger. The chat endpoint is the conversational path; the REST
//! mutations are the direct programmatic path the dashboard uses.

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::orchestrator::Orchestrator;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}
