//! User accounting records.
//!
//! `User` is an immutable value. Every balance change produces a new value
//! which is handed to the store's compare-and-update; nothing edits a shared
//! instance in place. The `revision` field is the compare token: a store
//! accepts an update only if the revision it holds still matches.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A user's accounting record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    name: String,
    credits_kb: u64,
    no_ratio: bool,
    group: Option<String>,
    revision: u64,
}

impl User {
    /// Create a fresh user with zero credits and no group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            credits_kb: 0,
            no_ratio: false,
            group: None,
            revision: 0,
        }
    }

    /// Reassemble a record from storage.
    pub fn from_parts(
        id: UserId,
        name: impl Into<String>,
        credits_kb: u64,
        no_ratio: bool,
        group: Option<String>,
        revision: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            credits_kb,
            no_ratio,
            group,
            revision,
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current balance in kilobytes.
    pub fn credits_kb(&self) -> u64 {
        self.credits_kb
    }

    /// Whether the user is exempt from download charges.
    pub fn is_no_ratio(&self) -> bool {
        self.no_ratio
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Compare token for the store's atomic update.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// A copy of this record with a new balance. Revision is unchanged; the
    /// store bumps it on commit.
    pub fn with_credits_kb(&self, credits_kb: u64) -> Self {
        Self {
            credits_kb,
            ..self.clone()
        }
    }

    pub fn with_no_ratio(self, no_ratio: bool) -> Self {
        Self { no_ratio, ..self }
    }

    pub fn with_group(self, group: Option<String>) -> Self {
        Self { group, ..self }
    }

    /// The committed successor of this record: same content, next revision.
    pub fn next_revision(&self) -> Self {
        Self {
            revision: self.revision + 1,
            ..self.clone()
        }
    }
}
