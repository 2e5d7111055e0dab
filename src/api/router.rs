use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::search;
use crate::AppState;

/// Simple request logger middleware
async fn log_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    tracing::info!(">>> {} {}", method, uri);
    let res = next.run(req).await;
    tracing::info!("<<< {} {} -> {}", method, uri, res.status());
    res
}

/// Build the search API router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(search::health))
        .route(
            "/principals/:principal_id/messages/search",
            get(search::search_messages),
        )
        .route(
            "/principals/:principal_id/search-cache",
            delete(search::invalidate_cache),
        )
        .route("/admin/quota/rejections", get(search::quota_rejections))
        .route("/admin/cache/stats", get(search::cache_stats))
        .layer(middleware::from_fn(log_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
