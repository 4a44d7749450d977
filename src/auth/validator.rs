//! Bearer-token validation against a resolved signing key.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::jwks::SigningKey;
use crate::error::ApiError;

/// Claim set of an accepted token. Only `sub` and `email` are read by the
/// synchronizer; everything else rides along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub exp: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Extract the key id from the token's unverified header.
///
/// A token without a kid can never be matched to a key, so it fails here
/// before any cache or network work happens.
pub fn token_kid(token: &str) -> Result<String, ApiError> {
    let header = decode_header(token)
        .map_err(|_| ApiError::MalformedToken("token header could not be decoded".into()))?;
    header
        .kid
        .ok_or_else(|| ApiError::MalformedToken("token header is missing 'kid'".into()))
}

/// Verify signature, audience, and expiry, returning the claim set.
///
/// The algorithm is pinned by the resolved key's type; the token's own
/// `alg` header is not trusted, so a key/algorithm mismatch cannot verify.
pub fn verify(token: &str, key: &SigningKey, audience: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(key.key_type.algorithm());
    validation.leeway = 0;
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "aud"]);

    let data =
        decode::<Claims>(token, &key.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ApiError::ExpiredToken,
            ErrorKind::InvalidAudience => ApiError::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim.as_str() == "aud" => {
                ApiError::InvalidAudience
            }
            _ => ApiError::InvalidToken,
        })?;

    Ok(data.claims)
}
