use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::cache::CacheStats;
use crate::quota::RejectionEvent;
use crate::search::{SearchFilter, SearchResultPage};
use crate::AppState;

/// Query string of a search request. Dates are `YYYY-MM-DD`, both inclusive.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub has_attachment: Option<bool>,
    pub max_results: Option<u32>,
    pub page_token: Option<String>,
}

impl SearchParams {
    fn into_filter(self, default_results: u32) -> SearchFilter {
        SearchFilter {
            date_from: self.from,
            date_to: self.to,
            sender: self.sender,
            subject: self.subject,
            has_attachment: self.has_attachment,
            max_results: self.max_results.unwrap_or(default_results),
            page_token: self.page_token,
        }
    }
}

fn parse_principal(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::InvalidPrincipal(format!("'{}' is not a valid principal id", raw)))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /principals/{principal_id}/messages/search
///
/// Dropping this future (client disconnect) drops the in-flight search with it.
pub async fn search_messages(
    State(state): State<AppState>,
    Path(principal_id): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResultPage>, ApiError> {
    let principal = parse_principal(&principal_id)?;
    let Query(params) = params.map_err(|e| ApiError::InvalidParameter(e.body_text()))?;

    let filter = params.into_filter(state.orchestrator.limits().default_results);
    tracing::debug!(principal = %principal, first_page = filter.is_first_page(), "Search request");

    let page = state.orchestrator.search(principal, filter).await?;
    Ok(Json(page))
}

/// DELETE /principals/{principal_id}/search-cache
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(principal_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let principal = parse_principal(&principal_id)?;
    let removed = state.orchestrator.invalidate(principal, None).await;
    tracing::info!(principal = %principal, removed, "Search cache invalidated");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /admin/quota/rejections
pub async fn quota_rejections(State(state): State<AppState>) -> Json<Vec<RejectionEvent>> {
    Json(state.orchestrator.limiter().recent_rejections())
}

/// GET /admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.orchestrator.cache().stats().await)
}
