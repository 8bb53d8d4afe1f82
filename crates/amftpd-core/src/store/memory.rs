//! In-memory user store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use amftpd_types::{User, UserId};

use super::{StoreError, StoreResult, UpdateOutcome, UserStore};

/// `DashMap`-backed user store.
///
/// Compare-and-update holds the shard lock for the user's key across the
/// revision check and the write, so it is atomic per user.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<UserId, User>,
    /// Login name → ID.
    names: DashMap<String, UserId>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn UserStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_user(&self, name: &str) -> StoreResult<Option<User>> {
        let Some(id) = self.names.get(name).map(|id| *id.value()) else {
            return Ok(None);
        };
        self.get_user(id).await
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        // Claim the name first so two inserts of the same name can't both win.
        match self.names.entry(user.name().to_string()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(user.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user.id());
            }
        }
        match self.users.entry(user.id()) {
            Entry::Occupied(_) => {
                self.names.remove(user.name());
                Err(StoreError::AlreadyExists(user.id().to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(users)
    }

    async fn try_update_user(&self, user: User) -> StoreResult<UpdateOutcome> {
        match self.users.entry(user.id()) {
            Entry::Vacant(_) => Ok(UpdateOutcome::Conflict { current: None }),
            Entry::Occupied(mut slot) => {
                if slot.get().revision() != user.revision() {
                    return Ok(UpdateOutcome::Conflict {
                        current: Some(slot.get().clone()),
                    });
                }
                let committed = user.next_revision();
                slot.insert(committed.clone());
                Ok(UpdateOutcome::Committed(committed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = MemoryUserStore::new();
        let alice = store.insert_user(User::new("alice").with_credits_kb(10)).await.unwrap();

        assert_eq!(store.get_user(alice.id()).await.unwrap(), Some(alice.clone()));
        assert_eq!(store.find_user("alice").await.unwrap(), Some(alice));
        assert_eq!(store.find_user("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = MemoryUserStore::new();
        store.insert_user(User::new("alice")).await.unwrap();
        let result = store.insert_user(User::new("alice")).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_revision() {
        let store = MemoryUserStore::new();
        let alice = store.insert_user(User::new("alice")).await.unwrap();

        let outcome = store.try_update_user(alice.with_credits_kb(50)).await.unwrap();
        let stored = match outcome {
            UpdateOutcome::Committed(user) => user,
            other => panic!("expected commit, got {other:?}"),
        };
        assert_eq!(stored.credits_kb(), 50);
        assert_eq!(stored.revision(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryUserStore::new();
        let alice = store.insert_user(User::new("alice")).await.unwrap();

        store.try_update_user(alice.with_credits_kb(50)).await.unwrap();
        let outcome = store.try_update_user(alice.with_credits_kb(99)).await.unwrap();

        let current = match outcome {
            UpdateOutcome::Conflict { current: Some(user) } => user,
            other => panic!("expected conflict, got {other:?}"),
        };
        assert_eq!(current.credits_kb(), 50);
        assert_eq!(
            store.get_user(alice.id()).await.unwrap().unwrap().credits_kb(),
            50
        );
    }

    #[tokio::test]
    async fn test_update_missing_user_conflicts() {
        let store = MemoryUserStore::new();
        let outcome = store.try_update_user(User::new("ghost")).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Conflict { current: None });
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let store = MemoryUserStore::new();
        store.insert_user(User::new("carol")).await.unwrap();
        store.insert_user(User::new("alice")).await.unwrap();
        store.insert_user(User::new("bob")).await.unwrap();

        let names: Vec<_> = store
            .list_users()
            .await
            .unwrap()
            .iter()
            .map(|u| u.name().to_string())
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
