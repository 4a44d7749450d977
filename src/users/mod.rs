//! Local user accounts and the point ledger.

pub mod handler;
pub mod store;
pub mod types;

pub use store::{CreditOutcome, UserStore};
pub use types::User;
