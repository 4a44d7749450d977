//! AI proxy route handlers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BreakdownRequest {
    story: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    prompt: Option<String>,
}

fn required_field(value: Option<&str>, name: &str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("request is missing '{name}'")))
}

/// `POST /api/breakdown-story`: split a story into scenes.
pub async fn breakdown_story(
    State(state): State<AppState>,
    Json(request): Json<BreakdownRequest>,
) -> Result<Json<Value>, ApiError> {
    let story = required_field(request.story.as_deref(), "story")?;
    let scenes = state.studio.breakdown_story(&story).await?;
    Ok(Json(json!({ "scenes": scenes })))
}

/// `POST /api/analyze-character`: describe the character in an image.
pub async fn analyze_character(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<Value>, ApiError> {
    let image = required_field(request.image_base64.as_deref(), "image_base64")?;
    let analysis = state.studio.analyze_character(&image).await?;
    Ok(Json(json!({ "analysis": analysis })))
}

/// `POST /api/generate-image`: generate an image from a prompt.
pub async fn generate_image(
    State(state): State<AppState>,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = required_field(request.prompt.as_deref(), "prompt")?;
    let url = state.studio.generate_image(&prompt).await?;
    Ok(Json(json!({ "imageUrl": url })))
}
