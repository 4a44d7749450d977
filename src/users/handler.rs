//! Account route handlers: profile and generation debit.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

/// `GET /api/user/profile`: the user's balance plus the point economics
/// the frontend needs to render purchase and generation buttons.
pub async fn profile(CurrentUser(user): CurrentUser, State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "user": {
            "id": user.id,
            "email": user.email,
            "points": user.points,
        },
        "config": {
            "points_per_purchase": state.economy.points_per_purchase,
            "cost_per_generation": state.economy.cost_per_generation,
        },
    }))
}

/// `POST /api/generate`: debit one generation's worth of points.
pub async fn generate(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let remaining = state
        .users
        .debit(&user.id, state.economy.cost_per_generation)?;
    Ok(Json(json!({
        "message": "points debited",
        "remaining_points": remaining,
    })))
}
