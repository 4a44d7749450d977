//! Billing route handlers: checkout creation and the Stripe webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::webhook::{self, WebhookEvent, CHECKOUT_COMPLETED};
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::users::CreditOutcome;
use crate::AppState;

/// `POST /api/create-checkout-session`: start a Stripe Checkout flow for
/// the current user.
pub async fn create_checkout_session(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let url = state.stripe.create_checkout_session(&user.id).await?;
    Ok(Json(json!({ "url": url })))
}

/// `POST /webhook/stripe`: credit points on completed checkouts.
///
/// The raw body is verified against the signing secret before anything in
/// it is trusted; replayed deliveries of the same session credit nothing.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::WebhookSignatureInvalid)?;

    webhook::verify_signature(
        &body,
        signature,
        &state.stripe.config.webhook_secret,
        state.stripe.config.signature_tolerance_secs,
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("unreadable webhook payload".into()))?;

    if event.event_type != CHECKOUT_COMPLETED {
        debug!(event_type = %event.event_type, "ignoring webhook event");
        return Ok("Success");
    }

    let session_id = event.data.object.id;
    let Some(user_id) = event.data.object.client_reference_id else {
        warn!(session_id = %session_id, "completed checkout without a client reference");
        return Ok("Success");
    };

    let amount = state.economy.points_per_purchase;
    match state.users.credit_once(&user_id, amount, &session_id)? {
        CreditOutcome::Applied { points } => {
            info!(user_id = %user_id, session_id = %session_id, points, "payment credited");
        }
        CreditOutcome::AlreadyProcessed => {
            debug!(session_id = %session_id, "webhook replay ignored");
        }
        CreditOutcome::UnknownUser => {
            warn!(user_id = %user_id, session_id = %session_id, "payment for unknown user");
        }
    }

    Ok("Success")
}
