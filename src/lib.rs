//! Quota-aware, cached search in front of Gmail's rate-limited message search.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod migration;
pub mod orchestrator;
pub mod quota;
pub mod retry;
pub mod search;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use orchestrator::SearchOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SearchOrchestrator>,
}
