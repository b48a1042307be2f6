use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    Router::new()
        .route("/api/usage/consume", post(handlers::consume_usage))
        .route("/api/usage/:user_id", get(handlers::get_plan_usage))
        .route("/api/usage/:user_id/check", get(handlers::check_limit))
        .route("/api/usage/:user_id/history", get(handlers::get_usage_history))
        .route("/api/usage/:user_id/totals", get(handlers::get_period_usage))
        .route(
            "/api/usage/:user_id/features/:feature",
            get(handlers::get_feature_usage),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
