// src/web/mod.rs
// Admin HTTP surface

pub mod admin;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::web::state::AppState;

/// Create the admin router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin_router = Router::new()
        .route("/news/filter-stats", get(admin::filter_stats))
        .route("/news/filter-stats/daily", get(admin::filter_stats_daily))
        .route("/news/layer15-stats", get(admin::layer15_stats))
        .route("/news/news-pipeline-stats", get(admin::news_pipeline_stats))
        .route("/news/trigger-monitor", post(admin::trigger_monitor))
        .route("/news/monitor-status", get(admin::monitor_status))
        .route("/pipeline/article/{id}", get(admin::pipeline_article))
        .route("/pipeline/stats", get(admin::pipeline_stats))
        .route("/pipeline/events", get(admin::pipeline_events))
        .with_state(state);

    Router::new()
        .route("/health", get(admin::health))
        .nest("/admin", admin_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
