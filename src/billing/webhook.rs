//! Stripe webhook signature verification and event parsing.
//!
//! The `Stripe-Signature` header carries a unix timestamp and one or more
//! HMAC-SHA256 signatures over `"{t}.{payload}"`. Nothing in the payload
//! is trusted until one signature verifies; comparison is constant-time
//! and the timestamp must be within the configured tolerance.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Event type this service acts on.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Parsed `Stripe-Signature` header.
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader, ApiError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for pair in header.split(',') {
        let Some((key, value)) = pair.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(ApiError::WebhookSignatureInvalid),
    }
}

/// Verify the signed payload against the shared webhook secret.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), ApiError> {
    let parsed = parse_signature_header(header)?;

    if (Utc::now().timestamp() - parsed.timestamp).abs() > tolerance_secs {
        return Err(ApiError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::WebhookSignatureInvalid)?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    let verified = parsed
        .signatures
        .iter()
        .any(|sig| bool::from(sig.as_slice().ct_eq(expected.as_slice())));

    if verified {
        Ok(())
    } else {
        Err(ApiError::WebhookSignatureInvalid)
    }
}

/// Webhook event envelope; only the fields this service reads.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    /// Checkout session id; the idempotency key for crediting.
    pub id: String,
    /// Subject id of the purchasing user, set at session creation.
    #[serde(default)]
    pub client_reference_id: Option<String>,
}
