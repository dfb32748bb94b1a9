//! HTTP gateway (C8): extraction endpoints plus health/status.

pub mod extractions;
pub mod health;
pub mod middleware;

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

use crate::state::AppState;
use crate::web::middleware::rate_limit::{RateLimitLayer, RateLimitState};

pub fn router(state: AppState) -> Router {
    let rate_limit = RateLimitLayer::new(Arc::new(RateLimitState::new(state.rate_limiting)));

    let scrape_routes = Router::new()
        .route("/extractions/scraper/{section_id}", post(extractions::start_scrape))
        .layer(rate_limit);

    let other_routes = Router::new()
        .route(
            "/extractions/identify_subjects/{batch_id}",
            post(extractions::identify_subjects),
        )
        .route("/extractions/add_subjects/{batch_id}", post(extractions::add_subjects))
        .route("/extractions/{id}", get(extractions::get_extraction))
        .route("/health", get(health::health))
        .route("/status", get(health::status));

    Router::new().merge(scrape_routes).merge(other_routes).with_state(state)
}
