use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::server::AppState;

/// Build the axum router with all Stele endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/about", get(handlers::about))
        .route("/health", get(handlers::health))
        .route(
            "/xAPI/statements",
            get(handlers::get_statements)
                .post(handlers::post_statements)
                .put(handlers::put_statement),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
