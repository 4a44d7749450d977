//! User store backed by redb embedded database.
//!
//! Two tables: user rows keyed by subject id, and processed checkout
//! sessions for webhook replay protection. redb serializes write
//! transactions, which gives get-or-create and the ledger operations
//! their atomicity without extra locking.

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use tracing::{debug, info};

use super::types::User;
use crate::error::ApiError;

/// Primary user table: subject id -> MessagePack<User>.
const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Processed checkout sessions: session id -> credit timestamp (unix secs).
const PAYMENTS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("processed_payments");

/// Outcome of a webhook credit attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Points were added; carries the new balance.
    Applied { points: i64 },
    /// The session id was seen before; nothing changed.
    AlreadyProcessed,
    /// No user row matches the reference; nothing changed and the session
    /// is not marked, so a later delivery can still succeed.
    UnknownUser,
}

/// Persistent user store.
pub struct UserStore {
    db: Database,
    starting_points: i64,
}

impl UserStore {
    /// Open or create a user store at the given path.
    pub fn open(path: PathBuf, starting_points: i64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open user database: {:?}", path))?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS_TABLE)?;
            let _ = write_txn.open_table(PAYMENTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            starting_points,
        })
    }

    /// Get a user by subject id.
    pub fn get(&self, id: &str) -> Result<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(id)? {
            Some(value) => {
                let user =
                    rmp_serde::from_slice(value.value()).context("Failed to deserialize user")?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Map a verified claim set onto a local user, registering one on
    /// first sight. Existing rows are returned unchanged; incoming claims
    /// never overwrite a stored email or balance.
    pub fn sync(&self, sub: &str, email: Option<&str>) -> Result<User, ApiError> {
        if let Some(user) = self.get(sub).map_err(ApiError::from)? {
            return Ok(user);
        }
        let email = email.ok_or(ApiError::MissingEmail)?;
        self.create_if_absent(sub, email).map_err(ApiError::from)
    }

    /// Insert a new user unless the subject already exists, returning
    /// whichever row is in the table after the transaction. Two racing
    /// first-time requests resolve to the first writer's row.
    fn create_if_absent(&self, sub: &str, email: &str) -> Result<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS_TABLE)?;
            let existing = match table.get(sub)? {
                Some(value) => Some(
                    rmp_serde::from_slice(value.value()).context("Failed to deserialize user")?,
                ),
                None => None,
            };
            match existing {
                Some(user) => user,
                None => {
                    let user =
                        User::new(sub.to_string(), email.to_string(), self.starting_points);
                    let data = rmp_serde::to_vec_named(&user).context("Failed to serialize user")?;
                    table.insert(sub, data.as_slice())?;
                    info!(user_id = %sub, "registered new user");
                    user
                }
            }
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Atomically debit `cost` points. The balance check and the decrement
    /// share one write transaction; an insufficient balance aborts with no
    /// mutation. Returns the remaining balance.
    pub fn debit(&self, sub: &str, cost: i64) -> Result<i64, ApiError> {
        let write_txn = self.db.begin_write().map_err(anyhow::Error::from)?;
        let remaining = {
            let mut table = write_txn
                .open_table(USERS_TABLE)
                .map_err(anyhow::Error::from)?;

            let mut user: User = {
                let value = table
                    .get(sub)
                    .map_err(anyhow::Error::from)?
                    .ok_or_else(|| anyhow::anyhow!("no user row for subject '{sub}'"))?;
                rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize user")
                    .map_err(ApiError::from)?
            };

            if user.points < cost {
                return Err(ApiError::InsufficientPoints {
                    points: user.points,
                    cost,
                });
            }

            user.points -= cost;
            let data = rmp_serde::to_vec_named(&user)
                .context("Failed to serialize user")
                .map_err(ApiError::from)?;
            table
                .insert(sub, data.as_slice())
                .map_err(anyhow::Error::from)?;
            user.points
        };
        write_txn.commit().map_err(anyhow::Error::from)?;

        debug!(user_id = %sub, cost, remaining, "points debited");
        Ok(remaining)
    }

    /// Credit `amount` points for a completed checkout session, at most
    /// once per session id. The replay check, the credit, and the session
    /// record share one write transaction.
    pub fn credit_once(&self, sub: &str, amount: i64, session_id: &str) -> Result<CreditOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut payments = write_txn.open_table(PAYMENTS_TABLE)?;
            if payments.get(session_id)?.is_some() {
                CreditOutcome::AlreadyProcessed
            } else {
                let mut users = write_txn.open_table(USERS_TABLE)?;
                let existing = match users.get(sub)? {
                    Some(value) => Some(
                        rmp_serde::from_slice::<User>(value.value())
                            .context("Failed to deserialize user")?,
                    ),
                    None => None,
                };
                match existing {
                    None => CreditOutcome::UnknownUser,
                    Some(mut user) => {
                        user.points += amount;
                        let data =
                            rmp_serde::to_vec_named(&user).context("Failed to serialize user")?;
                        users.insert(sub, data.as_slice())?;
                        payments.insert(session_id, chrono::Utc::now().timestamp())?;
                        CreditOutcome::Applied {
                            points: user.points,
                        }
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_store() -> (UserStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = UserStore::open(dir.path().join("users.redb"), 10).unwrap();
        (store, dir)
    }

    #[test]
    fn test_sync_registers_with_starting_balance() {
        let (store, _dir) = test_store();

        let user = store.sync("sub-1", Some("user@example.com")).unwrap();
        assert_eq!(user.id, "sub-1");
        assert_eq!(user.email, "user@example.com");
        assert_eq!(user.points, 10);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (store, _dir) = test_store();

        let first = store.sync("sub-1", Some("user@example.com")).unwrap();
        let second = store.sync("sub-1", Some("other@example.com")).unwrap();

        assert_eq!(second.email, first.email);
        assert_eq!(second.points, first.points);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_sync_requires_email_on_first_sight_only() {
        let (store, _dir) = test_store();

        let result = store.sync("sub-1", None);
        assert!(matches!(result, Err(ApiError::MissingEmail)));

        store.sync("sub-1", Some("user@example.com")).unwrap();
        assert!(store.sync("sub-1", None).is_ok());
    }

    #[test]
    fn test_debit_and_insufficient() {
        let (store, _dir) = test_store();
        store.sync("sub-1", Some("user@example.com")).unwrap();

        assert_eq!(store.debit("sub-1", 1).unwrap(), 9);
        assert_eq!(store.debit("sub-1", 9).unwrap(), 0);

        let result = store.debit("sub-1", 1);
        assert!(matches!(
            result,
            Err(ApiError::InsufficientPoints { points: 0, cost: 1 })
        ));
        // The failed debit mutated nothing.
        assert_eq!(store.get("sub-1").unwrap().unwrap().points, 0);
    }

    #[test]
    fn test_concurrent_debits_are_exact() {
        let dir = tempdir().unwrap();
        let store = Arc::new(UserStore::open(dir.path().join("users.redb"), 100).unwrap());
        store.sync("sub-1", Some("user@example.com")).unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || store.debit("sub-1", 1)));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.join().unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 100);
        assert_eq!(store.get("sub-1").unwrap().unwrap().points, 0);

        // The 101st debit finds nothing left.
        assert!(matches!(
            store.debit("sub-1", 1),
            Err(ApiError::InsufficientPoints { .. })
        ));
    }

    #[test]
    fn test_credit_is_idempotent_per_session() {
        let (store, _dir) = test_store();
        store.sync("sub-1", Some("user@example.com")).unwrap();

        let outcome = store.credit_once("sub-1", 10, "cs_123").unwrap();
        assert_eq!(outcome, CreditOutcome::Applied { points: 20 });

        let outcome = store.credit_once("sub-1", 10, "cs_123").unwrap();
        assert_eq!(outcome, CreditOutcome::AlreadyProcessed);
        assert_eq!(store.get("sub-1").unwrap().unwrap().points, 20);

        // A different session credits again.
        let outcome = store.credit_once("sub-1", 10, "cs_456").unwrap();
        assert_eq!(outcome, CreditOutcome::Applied { points: 30 });
    }

    #[test]
    fn test_credit_for_unknown_user_changes_nothing() {
        let (store, _dir) = test_store();

        let outcome = store.credit_once("ghost", 10, "cs_123").unwrap();
        assert_eq!(outcome, CreditOutcome::UnknownUser);

        // The session was not consumed: after registration a retry works.
        store.sync("ghost", Some("ghost@example.com")).unwrap();
        let outcome = store.credit_once("ghost", 10, "cs_123").unwrap();
        assert_eq!(outcome, CreditOutcome::Applied { points: 20 });
    }

    #[test]
    fn test_concurrent_credits_for_same_session_apply_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(UserStore::open(dir.path().join("users.redb"), 10).unwrap());
        store.sync("sub-1", Some("user@example.com")).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.credit_once("sub-1", 10, "cs_dup").unwrap()
            }));
        }

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, CreditOutcome::Applied { .. }))
            .count();

        assert_eq!(applied, 1);
        assert_eq!(store.get("sub-1").unwrap().unwrap().points, 20);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.redb");

        {
            let store = UserStore::open(path.clone(), 10).unwrap();
            store.sync("sub-1", Some("user@example.com")).unwrap();
            store.debit("sub-1", 4).unwrap();
        }

        let store = UserStore::open(path, 10).unwrap();
        let user = store.get("sub-1").unwrap().unwrap();
        assert_eq!(user.email, "user@example.com");
        assert_eq!(user.points, 6);
    }
}
