/// Application routes configuration
use crate::handlers::{
    get_complete_weather, get_most_significant, get_processed_events, health, list_stories,
    refresh_weather, request_story, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Weather pipeline endpoints
        .route("/weather/complete", get(get_complete_weather))
        .route("/weather/events", get(get_processed_events))
        .route("/weather/significant", get(get_most_significant))
        .route("/weather/refresh", get(refresh_weather))
        // Story endpoints
        .route("/story", post(request_story))
        .route("/stories", get(list_stories))
        .with_state(state)
}
