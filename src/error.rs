//! Error taxonomy for the gateway.
//!
//! Every failure surfaced to a client carries a stable snake_case code and
//! a short message. Detail strings (upstream status lines, store errors)
//! stay in the logs; they are never echoed back to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the auth, ledger, billing, and proxy layers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Token cannot be decoded, or its header has no key id.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The JWKS endpoint could not be fetched or returned a failure status.
    #[error("failed to fetch signing keys: {0}")]
    KeyFetchError(String),

    /// The token names a kid that the freshly fetched key set does not have.
    #[error("no signing key found for kid '{kid}'")]
    UnknownKeyId { kid: String },

    /// The matched key declares a type outside the supported set, or its
    /// key material is unusable.
    #[error("unsupported signing key: {0}")]
    UnsupportedKeyType(String),

    /// The audience claim does not match the configured value.
    #[error("token audience mismatch")]
    InvalidAudience,

    /// The token's expiry is in the past.
    #[error("token expired")]
    ExpiredToken,

    /// Any other structural or cryptographic validation failure.
    #[error("invalid token")]
    InvalidToken,

    /// A verified token without a subject cannot identify a user.
    #[error("token is missing the subject claim")]
    MissingSubject,

    /// First-time registration needs an email claim.
    #[error("token is missing the email claim")]
    MissingEmail,

    /// The point balance does not cover the requested debit.
    #[error("insufficient points: {points} available, {cost} required")]
    InsufficientPoints { points: i64, cost: i64 },

    /// The webhook payload failed signature verification.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// A vendor call (model API, Stripe) failed.
    #[error("upstream service error: {0}")]
    Upstream(String),

    /// The request body is missing a required field or is not valid JSON.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Store or serialization failure. Logged with detail, reported opaquely.
    #[error("internal error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ApiError {
    /// Stable machine-readable code for the client.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedToken(_) => "malformed_token",
            ApiError::KeyFetchError(_) => "key_fetch_error",
            ApiError::UnknownKeyId { .. } => "unknown_key_id",
            ApiError::UnsupportedKeyType(_) => "unsupported_key_type",
            ApiError::InvalidAudience => "invalid_audience",
            ApiError::ExpiredToken => "expired_token",
            ApiError::InvalidToken => "invalid_token",
            ApiError::MissingSubject => "missing_subject",
            ApiError::MissingEmail => "missing_email",
            ApiError::InsufficientPoints { .. } => "insufficient_points",
            ApiError::WebhookSignatureInvalid => "webhook_signature_invalid",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedToken(_)
            | ApiError::UnknownKeyId { .. }
            | ApiError::UnsupportedKeyType(_)
            | ApiError::InvalidAudience
            | ApiError::ExpiredToken
            | ApiError::InvalidToken
            | ApiError::MissingSubject => StatusCode::UNAUTHORIZED,
            ApiError::MissingEmail
            | ApiError::WebhookSignatureInvalid
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientPoints { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::KeyFetchError(_) | ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client. Variants carrying infrastructure
    /// detail get a fixed phrasing instead of their Display output.
    fn client_message(&self) -> String {
        match self {
            ApiError::KeyFetchError(_) => "unable to fetch signing keys from the issuer".into(),
            ApiError::Upstream(_) => "upstream service request failed".into(),
            ApiError::Internal(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(err) => error!(error = %err, "request failed"),
            ApiError::KeyFetchError(detail) => warn!(detail = %detail, "signing key fetch failed"),
            ApiError::Upstream(detail) => warn!(detail = %detail, "upstream call failed"),
            _ => {}
        }

        let body = json!({
            "error": self.code(),
            "message": self.client_message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::MalformedToken("no kid".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::ExpiredToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::MissingEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InsufficientPoints { points: 0, cost: 1 }.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::WebhookSignatureInvalid.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::KeyFetchError("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(ApiError::UnknownKeyId { kid: "k".into() }.code(), "unknown_key_id");
        assert_eq!(ApiError::InvalidAudience.code(), "invalid_audience");
        assert_eq!(ApiError::MissingSubject.code(), "missing_subject");
        assert_eq!(ApiError::WebhookSignatureInvalid.code(), "webhook_signature_invalid");
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let err = ApiError::Internal(anyhow::anyhow!("users.redb: permission denied"));
        assert_eq!(err.client_message(), "internal server error");

        let err = ApiError::KeyFetchError("connection refused to 10.0.0.5".into());
        assert!(!err.client_message().contains("10.0.0.5"));
    }
}
