//! JWKS fetching and signing-key resolution.
//!
//! Resolution order: persisted cache (fast path, no network) when the
//! batch is within TTL and holds the requested kid; otherwise a full
//! refetch from the issuer that replaces the cache wholesale. A kid absent
//! from a fresh fetch is a hard failure, not a retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::cache::{JwksCacheStore, KeyBatch};
use crate::error::ApiError;

/// JWKS response from the issuer's well-known endpoint.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<serde_json::Value>,
}

/// Supported key types. Closed set; anything else is rejected when the
/// key is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Ec,
    Rsa,
    Okp,
}

impl KeyType {
    fn from_tag(tag: &str) -> Result<Self, ApiError> {
        match tag {
            "EC" => Ok(KeyType::Ec),
            "RSA" => Ok(KeyType::Rsa),
            "OKP" => Ok(KeyType::Okp),
            other => Err(ApiError::UnsupportedKeyType(format!(
                "unknown key type '{other}'"
            ))),
        }
    }

    /// The single verification algorithm a key of this type may use.
    pub fn algorithm(self) -> Algorithm {
        match self {
            KeyType::Ec => Algorithm::ES256,
            KeyType::Rsa => Algorithm::RS256,
            KeyType::Okp => Algorithm::EdDSA,
        }
    }
}

/// Individual JSON Web Key as stored in the cache.
#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// A resolved public key ready for verification, tagged with its type.
pub struct SigningKey {
    pub kid: String,
    pub key_type: KeyType,
    pub decoding_key: DecodingKey,
}

impl SigningKey {
    /// Build a verification key from a raw JWK, dispatching on its declared
    /// type. Every path goes through this dispatch, cache hits included.
    pub fn from_jwk(kid: &str, raw: &serde_json::Value) -> Result<Self, ApiError> {
        let jwk: Jwk = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::UnsupportedKeyType(format!("unreadable JWK: {e}")))?;
        let key_type = KeyType::from_tag(&jwk.kty)?;

        let decoding_key = match key_type {
            KeyType::Ec => ec_decoding_key(&jwk)?,
            KeyType::Rsa => rsa_decoding_key(&jwk)?,
            KeyType::Okp => okp_decoding_key(&jwk)?,
        };

        Ok(Self {
            kid: kid.to_string(),
            key_type,
            decoding_key,
        })
    }
}

fn required<'a>(field: Option<&'a String>, name: &str, kty: &str) -> Result<&'a str, ApiError> {
    field
        .map(String::as_str)
        .ok_or_else(|| ApiError::UnsupportedKeyType(format!("{kty} key missing '{name}'")))
}

fn rsa_decoding_key(jwk: &Jwk) -> Result<DecodingKey, ApiError> {
    let n = required(jwk.n.as_ref(), "n", "RSA")?;
    let e = required(jwk.e.as_ref(), "e", "RSA")?;
    DecodingKey::from_rsa_components(n, e)
        .map_err(|e| ApiError::UnsupportedKeyType(format!("bad RSA components: {e}")))
}

fn okp_decoding_key(jwk: &Jwk) -> Result<DecodingKey, ApiError> {
    let crv = required(jwk.crv.as_ref(), "crv", "OKP")?;
    if crv != "Ed25519" {
        return Err(ApiError::UnsupportedKeyType(format!(
            "unsupported OKP curve '{crv}'"
        )));
    }
    let x = required(jwk.x.as_ref(), "x", "OKP")?;
    DecodingKey::from_ed_components(x)
        .map_err(|e| ApiError::UnsupportedKeyType(format!("bad Ed25519 key: {e}")))
}

fn ec_decoding_key(jwk: &Jwk) -> Result<DecodingKey, ApiError> {
    let crv = required(jwk.crv.as_ref(), "crv", "EC")?;
    if crv != "P-256" {
        // ES256 is the only EC algorithm in the accepted set.
        return Err(ApiError::UnsupportedKeyType(format!(
            "unsupported EC curve '{crv}'"
        )));
    }
    let x = required(jwk.x.as_ref(), "x", "EC")?;
    let y = required(jwk.y.as_ref(), "y", "EC")?;

    let x_bytes = URL_SAFE_NO_PAD
        .decode(x)
        .map_err(|e| ApiError::UnsupportedKeyType(format!("bad EC x coordinate: {e}")))?;
    let y_bytes = URL_SAFE_NO_PAD
        .decode(y)
        .map_err(|e| ApiError::UnsupportedKeyType(format!("bad EC y coordinate: {e}")))?;

    // Uncompressed point (0x04 || x || y) wrapped as a DER SubjectPublicKeyInfo.
    let mut point = vec![0x04];
    point.extend_from_slice(&x_bytes);
    point.extend_from_slice(&y_bytes);

    Ok(DecodingKey::from_ec_der(&wrap_p256_public_key(&point)))
}

/// Wrap a P-256 public key point in DER SubjectPublicKeyInfo format.
fn wrap_p256_public_key(point: &[u8]) -> Vec<u8> {
    // OID 1.2.840.10045.2.1 (ecPublicKey)
    let ec_public_key_oid = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
    // OID 1.2.840.10045.3.1.7 (prime256v1)
    let curve_oid = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

    let mut alg_id = vec![0x30]; // SEQUENCE
    let alg_id_content_len = 2 + ec_public_key_oid.len() + 2 + curve_oid.len();
    alg_id.push(alg_id_content_len as u8);
    alg_id.push(0x06); // OID tag
    alg_id.push(ec_public_key_oid.len() as u8);
    alg_id.extend_from_slice(ec_public_key_oid);
    alg_id.push(0x06); // OID tag
    alg_id.push(curve_oid.len() as u8);
    alg_id.extend_from_slice(curve_oid);

    let mut bit_string = vec![0x03]; // BIT STRING tag
    let bit_string_len = point.len() + 1; // +1 for unused bits byte
    if bit_string_len < 128 {
        bit_string.push(bit_string_len as u8);
    } else {
        bit_string.push(0x81);
        bit_string.push(bit_string_len as u8);
    }
    bit_string.push(0x00); // unused bits
    bit_string.extend_from_slice(point);

    let mut der = vec![0x30]; // SEQUENCE
    let total_len = alg_id.len() + bit_string.len();
    if total_len < 128 {
        der.push(total_len as u8);
    } else {
        der.push(0x81);
        der.push(total_len as u8);
    }
    der.extend_from_slice(&alg_id);
    der.extend_from_slice(&bit_string);

    der
}

/// Resolves a token's kid to a usable public key, consulting and
/// refreshing the persisted cache.
pub struct KeyResolver {
    store: Arc<dyn JwksCacheStore>,
    http: reqwest::Client,
    jwks_url: String,
    ttl_secs: u64,
}

impl KeyResolver {
    pub fn new(store: Arc<dyn JwksCacheStore>, jwks_url: String, ttl_secs: u64) -> Result<Self> {
        anyhow::ensure!(
            jwks_url.starts_with("https://") || jwks_url.starts_with("http://"),
            "jwks_url must be an HTTP(S) URL"
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            store,
            http,
            jwks_url,
            ttl_secs,
        })
    }

    /// Resolve a kid to a signing key.
    ///
    /// A fresh batch holding the kid is served straight from the cache.
    /// Anything else (expired batch, unknown kid, unreadable cache)
    /// triggers one full refetch that replaces the cache, even when the
    /// requested kid turns out to be absent from the new set.
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, ApiError> {
        match self.store.load() {
            Ok(Some(batch)) if batch.is_fresh(self.ttl_secs) => {
                if let Some(raw) = batch.keys.get(kid) {
                    debug!(kid, "signing key served from cache");
                    return SigningKey::from_jwk(kid, raw);
                }
                debug!(kid, "fresh cache has no such kid, refetching");
            }
            Ok(Some(_)) => debug!(kid, "cached key batch expired, refetching"),
            Ok(None) => debug!(kid, "no cached key batch, fetching"),
            Err(e) => warn!(error = %e, "failed to read key cache, treating as miss"),
        }

        let batch = self.fetch_batch().await?;
        if let Err(e) = self.store.save(&batch) {
            warn!(error = %e, "failed to persist refreshed key batch");
        }

        let raw = batch.keys.get(kid).ok_or_else(|| ApiError::UnknownKeyId {
            kid: kid.to_string(),
        })?;
        SigningKey::from_jwk(kid, raw)
    }

    async fn fetch_batch(&self) -> Result<KeyBatch, ApiError> {
        debug!(url = %self.jwks_url, "fetching JWKS");

        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| ApiError::KeyFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::KeyFetchError(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| ApiError::KeyFetchError(format!("unparseable JWKS body: {e}")))?;

        let mut keys = HashMap::new();
        for raw in jwks.keys {
            match raw.get("kid").and_then(|v| v.as_str()) {
                Some(kid) => {
                    keys.insert(kid.to_string(), raw);
                }
                None => warn!("skipping JWK without a kid"),
            }
        }

        info!(url = %self.jwks_url, key_count = keys.len(), "key set refreshed");
        Ok(KeyBatch::new(keys))
    }
}
