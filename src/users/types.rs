//! User account types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local user account, keyed by the identity provider's subject id.
///
/// The id is opaque and immutable; email and points are set at creation
/// and only changed by the ledger operations, never by incoming claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Subject id issued by the identity provider.
    pub id: String,

    /// Email captured at registration.
    pub email: String,

    /// Point balance, spent by generations and topped up by purchases.
    pub points: i64,

    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: String, email: String, starting_points: i64) -> Self {
        Self {
            id,
            email,
            points: starting_points,
            created_at: Utc::now(),
        }
    }
}
