/// HTTP request handlers
use crate::domain::{Health, StoryRequest};
use crate::errors::ApiError;
use crate::services::story::StoryService;
use crate::services::WeatherService;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub weather_service: Arc<WeatherService>,
    pub story_service: Arc<StoryService>,
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Health check handler
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
    })
}

/// Get the complete space-weather bundle
pub async fn get_complete_weather(State(state): State<AppState>) -> Json<Value> {
    let bundle = state.weather_service.get_complete_data().await;
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "weather": bundle
    }))))
}

/// Get all processed weather events
pub async fn get_processed_events(State(state): State<AppState>) -> Json<Value> {
    let events = state.weather_service.process_all_current_data().await;
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "events": events
    }))))
}

/// Get the most significant current event
pub async fn get_most_significant(State(state): State<AppState>) -> Json<Value> {
    let event = state.weather_service.get_most_significant_event().await;

    match event {
        Some(event) => Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
            "event": event
        })))),
        None => Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
            "message": "no data"
        })))),
    }
}

/// Force a pass through the aggregator refresh gates
pub async fn refresh_weather(State(state): State<AppState>) -> Json<Value> {
    let bundle = state.weather_service.get_complete_data().await;
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "fetched_at": bundle.fetched_at
    }))))
}

/// List recently generated stories
pub async fn list_stories(State(state): State<AppState>) -> Json<Value> {
    let stories = state.story_service.recent_stories().await;
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "stories": stories
    }))))
}

/// Request a story. Generation being unavailable is reported as a friendly
/// message, not an error.
pub async fn request_story(
    State(state): State<AppState>,
    Json(request): Json<StoryRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.character.trim().is_empty() {
        return Err(ApiError::InvalidInput("character must not be empty".to_string()));
    }

    let story = state.story_service.request_story(&request).await;

    match story {
        Some(story) => Ok(Json(serde_json::json!(SuccessResponse::new(
            serde_json::json!({ "story": story })
        )))),
        None => Ok(Json(serde_json::json!(SuccessResponse::new(
            serde_json::json!({
                "story": Value::Null,
                "message": "storyteller is temporarily unavailable for this character"
            })
        )))),
    }
}
