// API route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the operator-console routes.
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Acquisition
        .route("/crawl/quick", post(handlers::crawl_quick))
        .route("/crawl/full", post(handlers::crawl_full))
        .route("/crawl/smart", post(handlers::crawl_smart))
        .route("/crawl/batch", post(handlers::crawl_batch))
        // Tasks
        .route("/tasks/:id", get(handlers::get_task))
        .route("/tasks/:id", delete(handlers::cancel_task))
        // Analytics
        .route("/search", get(handlers::search_drugs))
        .route("/drugs/:id/prices", get(handlers::drug_prices))
        .route("/compare", get(handlers::compare_drug))
        .route("/monitor/alerts", get(handlers::recent_alerts))
        .with_state(state)
}
