//! Bearer-token authentication against the identity provider's JWKS.
//!
//! Signing keys are resolved through a persisted, TTL-bounded cache and
//! tokens are verified with the algorithm pinned by the resolved key's
//! type. Verified subjects are synchronized into the local user store.

pub mod cache;
pub mod extract;
pub mod jwks;
pub mod validator;

pub use cache::{FileCacheStore, JwksCacheStore, KeyBatch, MemoryCacheStore};
pub use extract::{Authenticator, CurrentUser};
pub use jwks::KeyResolver;
