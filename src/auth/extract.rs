//! Request authentication: bearer extraction, verification, user sync.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use super::jwks::KeyResolver;
use super::validator;
use crate::error::ApiError;
use crate::users::{User, UserStore};

/// Runs the full pipeline for a bearer token: key resolution, validation,
/// then user synchronization.
pub struct Authenticator {
    resolver: KeyResolver,
    audience: String,
    users: Arc<UserStore>,
}

impl Authenticator {
    pub fn new(resolver: KeyResolver, audience: String, users: Arc<UserStore>) -> Self {
        Self {
            resolver,
            audience,
            users,
        }
    }

    /// Verify a bearer token and return the local user it maps to,
    /// registering the user on first sight.
    pub async fn authenticate(&self, token: &str) -> Result<User, ApiError> {
        let kid = validator::token_kid(token)?;
        let key = self.resolver.resolve(&kid).await?;
        debug!(kid = %key.kid, key_type = ?key.key_type, "resolved signing key");
        let claims = validator::verify(token, &key, &self.audience)?;

        let sub = claims.sub.as_deref().ok_or(ApiError::MissingSubject)?;
        let user = self.users.sync(sub, claims.email.as_deref())?;
        debug!(user_id = %user.id, "request authenticated");
        Ok(user)
    }
}

/// The authenticated user behind a protected route.
///
/// Protected handlers take this as their first argument; extraction runs
/// the full authentication pipeline and rejects with a taxonomy error.
pub struct CurrentUser(pub User);

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::MalformedToken("missing bearer token".into()))?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| {
            ApiError::MalformedToken("authorization header is not a bearer token".into())
        })
}

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<Authenticator>::from_ref(state);
        let token = bearer_token(parts)?.to_string();
        let user = auth.authenticate(&token).await?;
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cache::MemoryCacheStore;
    use crate::auth::testkeys::{self, TestKeyPair};
    use serde_json::json;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STARTING_POINTS: i64 = 10;

    async fn authenticator_for(
        pair: &TestKeyPair,
    ) -> (Authenticator, Arc<UserStore>, MockServer, TempDir) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"keys": [pair.jwk()]})),
            )
            .mount(&server)
            .await;

        let resolver = KeyResolver::new(
            Arc::new(MemoryCacheStore::new()),
            format!("{}/keys", server.uri()),
            3600,
        )
        .unwrap();

        let dir = tempdir().unwrap();
        let users = Arc::new(
            UserStore::open(dir.path().join("users.redb"), STARTING_POINTS).unwrap(),
        );

        let auth = Authenticator::new(resolver, "authenticated".to_string(), users.clone());
        (auth, users, server, dir)
    }

    fn claims(sub: &str, email: Option<&str>) -> serde_json::Value {
        let exp = chrono::Utc::now().timestamp() + 3600;
        match email {
            Some(email) => json!({"sub": sub, "email": email, "aud": "authenticated", "exp": exp}),
            None => json!({"sub": sub, "aud": "authenticated", "exp": exp}),
        }
    }

    #[tokio::test]
    async fn test_first_sight_registers_user() {
        let pair = testkeys::generate();
        let (auth, _users, _server, _dir) = authenticator_for(&pair).await;

        let token = pair.sign(claims("sub-1", Some("user@example.com")));
        let user = auth.authenticate(&token).await.unwrap();

        assert_eq!(user.id, "sub-1");
        assert_eq!(user.email, "user@example.com");
        assert_eq!(user.points, STARTING_POINTS);
    }

    #[tokio::test]
    async fn test_existing_user_not_overwritten_by_claims() {
        let pair = testkeys::generate();
        let (auth, users, _server, _dir) = authenticator_for(&pair).await;

        let token = pair.sign(claims("sub-1", Some("original@example.com")));
        auth.authenticate(&token).await.unwrap();
        users.debit("sub-1", 3).unwrap();

        // Same subject, different email in the claims.
        let token = pair.sign(claims("sub-1", Some("changed@example.com")));
        let user = auth.authenticate(&token).await.unwrap();

        assert_eq!(user.email, "original@example.com");
        assert_eq!(user.points, STARTING_POINTS - 3);
    }

    #[tokio::test]
    async fn test_existing_user_needs_no_email_claim() {
        let pair = testkeys::generate();
        let (auth, _users, _server, _dir) = authenticator_for(&pair).await;

        auth.authenticate(&pair.sign(claims("sub-1", Some("user@example.com"))))
            .await
            .unwrap();

        let user = auth.authenticate(&pair.sign(claims("sub-1", None))).await.unwrap();
        assert_eq!(user.email, "user@example.com");
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let pair = testkeys::generate();
        let (auth, _users, _server, _dir) = authenticator_for(&pair).await;

        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = pair.sign(json!({"aud": "authenticated", "exp": exp}));

        let result = auth.authenticate(&token).await;
        assert!(matches!(result, Err(ApiError::MissingSubject)));
    }

    #[tokio::test]
    async fn test_first_sight_without_email_rejected() {
        let pair = testkeys::generate();
        let (auth, users, _server, _dir) = authenticator_for(&pair).await;

        let result = auth.authenticate(&pair.sign(claims("sub-1", None))).await;
        assert!(matches!(result, Err(ApiError::MissingEmail)));
        assert!(users.get("sub-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_kid_never_falls_back_to_another_key() {
        let pair = testkeys::generate_with_kid("known-kid");
        let (auth, _users, _server, _dir) = authenticator_for(&pair).await;

        // Signed by a key whose kid the issuer does not publish.
        let rogue = testkeys::generate_with_kid("rogue-kid");
        let token = rogue.sign(claims("sub-1", Some("user@example.com")));

        let result = auth.authenticate(&token).await;
        assert!(matches!(result, Err(ApiError::UnknownKeyId { kid }) if kid == "rogue-kid"));
    }
}
