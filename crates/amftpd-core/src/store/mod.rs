//! User record persistence.
//!
//! This module defines the contract the accounting layer relies on and the
//! built-in backends:
//!
//! - [`UserStore`] - async trait with an atomic compare-and-update
//! - [`MemoryUserStore`] - `DashMap`-backed, for tests and ephemeral daemons
//! - [`SqliteUserStore`] - single-file SQLite persistence
//! - [`StoreRegistry`] - explicit name → factory map, filled at startup
//!
//! ## Update contract
//!
//! `try_update_user` is keyed by [`UserId`] and compares on
//! [`User::revision`]. It commits only when the stored revision equals the
//! submitted one, and the committed record carries the next revision. A
//! mismatch is not an error: it returns [`UpdateOutcome::Conflict`] with the
//! current record so the caller can recompute from a fresh read.

mod memory;
mod registry;
mod sqlite;

pub use memory::MemoryUserStore;
pub use registry::{StoreFactory, StoreRegistry};
pub use sqlite::SqliteUserStore;

use async_trait::async_trait;

use amftpd_types::{User, UserId};

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A user with this name or ID already exists.
    #[error("user already exists: {0}")]
    AlreadyExists(String),

    /// No backend registered under this name.
    #[error("unknown store backend: {0}")]
    UnknownBackend(String),

    /// Backend configuration is incomplete or invalid.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Other backend failure.
    #[error("{0}")]
    Other(String),
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a compare-and-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Written; this is the stored record (with its new revision).
    Committed(User),
    /// Another write got there first. `current` is the stored record, or
    /// `None` if the user no longer exists.
    Conflict { current: Option<User> },
}

/// Persistence for user accounting records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Backend name (e.g. "memory", "sqlite").
    fn name(&self) -> &str;

    /// Fetch a user by ID.
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Fetch a user by login name.
    async fn find_user(&self, name: &str) -> StoreResult<Option<User>>;

    /// Insert a new user. Fails if the ID or name is taken.
    async fn insert_user(&self, user: User) -> StoreResult<User>;

    /// All users, ordered by name.
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// Atomically replace the stored record if its revision still matches.
    async fn try_update_user(&self, user: User) -> StoreResult<UpdateOutcome>;
}
