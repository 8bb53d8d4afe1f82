//! Accounting facade: the only accounting entry point for sessions.
//!
//! Wraps the [`RatioEngine`] with two independent fallback layers and owns
//! the decision to persist:
//!
//! - **Disabled mode** (no engine configured): every check passes and every
//!   mutation is a no-op.
//! - **No-ratio users**: never denied and never debited on download, but
//!   still credited on upload. Earning is always on; spending is exemptable.
//!
//! Balance changes go through the store's compare-and-update. On conflict
//! the facade re-reads the user and recomputes the delta against the fresh
//! balance, so two concurrent downloads cannot both spend the same credits.
//! Store failures are returned to the caller, never swallowed.

use std::sync::Arc;

use amftpd_types::{AccessDecision, Section, User, UserId};

use crate::ratio::{Debit, RatioEngine};
use crate::store::{StoreError, UpdateOutcome, UserStore};

/// Compare-and-update attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Why a download was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DenialReason {
    #[strum(serialize = "insufficient credits")]
    InsufficientCredits,
}

/// Result of a pre-transfer check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(DenialReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Human-readable denial reason, for the session to relay.
    pub fn reason(&self) -> Option<String> {
        match self {
            Verdict::Allowed => None,
            Verdict::Denied(reason) => Some(reason.to_string()),
        }
    }
}

/// Result of applying a transfer to a balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Accounting does not apply: disabled mode, or a no-ratio download.
    Skipped,
    /// Priced at zero (free or unknown section); nothing written.
    Free,
    /// The balance no longer covers the cost. Nothing written.
    Declined { balance: u64, cost: u64 },
    /// Written. `user` is the stored record, `delta` the credits moved.
    Committed { user: User, delta: u64 },
}

/// Error type for accounting operations.
#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    /// The store failed; the transfer is not accounted for.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The user record disappeared from the store.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// Every compare-and-update attempt lost to a concurrent writer.
    #[error("gave up on {user} after {attempts} conflicting updates")]
    Contention { user: String, attempts: usize },
}

/// Accounting result type.
pub type AccountingResult<T> = Result<T, AccountingError>;

/// Whether a ratio engine is configured.
#[derive(Debug, Clone)]
pub enum AccountingMode {
    Enabled(RatioEngine),
    Disabled,
}

/// Orchestrates ratio checks and balance mutation.
#[derive(Clone)]
pub struct AccountingFacade {
    mode: AccountingMode,
    store: Arc<dyn UserStore>,
    max_attempts: usize,
}

impl std::fmt::Debug for AccountingFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountingFacade")
            .field("mode", &self.mode)
            .field("store", &self.store.name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl AccountingFacade {
    /// Ratio enforcement on.
    pub fn enabled(engine: RatioEngine, store: Arc<dyn UserStore>) -> Self {
        Self::with_mode(AccountingMode::Enabled(engine), store)
    }

    /// Ratio enforcement off: checks pass, mutations are no-ops.
    pub fn disabled(store: Arc<dyn UserStore>) -> Self {
        Self::with_mode(AccountingMode::Disabled, store)
    }

    pub fn with_mode(mode: AccountingMode, store: Arc<dyn UserStore>) -> Self {
        Self {
            mode,
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the compare-and-update retry bound (minimum 1).
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, AccountingMode::Enabled(_))
    }

    pub fn mode(&self) -> &AccountingMode {
        &self.mode
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Gate a download before any bytes move.
    pub fn can_download(&self, user: &User, section: &str, size_bytes: u64) -> Verdict {
        let AccountingMode::Enabled(engine) = &self.mode else {
            return Verdict::Allowed;
        };
        if user.is_no_ratio() || engine.can_download(user, section, size_bytes) {
            Verdict::Allowed
        } else {
            tracing::debug!(
                user = %user.name(),
                section = %section,
                balance = user.credits_kb(),
                "download denied"
            );
            Verdict::Denied(DenialReason::InsufficientCredits)
        }
    }

    /// What `user` may do in the section a path resolved to.
    ///
    /// Downloading additionally requires that the user could afford the
    /// smallest possible charge in that section.
    pub fn access(&self, section: Option<&Section>, user: &User) -> AccessDecision {
        let Some(section) = section else {
            return AccessDecision::deny_all();
        };
        AccessDecision {
            can_list: true,
            can_upload: section.allow_upload,
            can_download: section.allow_download
                && self.can_download(user, &section.name, 1).is_allowed(),
        }
    }

    /// Charge a completed download.
    ///
    /// Callers gate with [`can_download`](Self::can_download) first; if the
    /// balance no longer covers the cost at commit time the result is
    /// [`Settlement::Declined`] and nothing is written.
    pub async fn apply_download(
        &self,
        user: &User,
        section: &str,
        size_bytes: u64,
    ) -> AccountingResult<Settlement> {
        let AccountingMode::Enabled(engine) = &self.mode else {
            return Ok(Settlement::Skipped);
        };

        let mut current = user.clone();
        for _ in 0..self.max_attempts {
            if current.is_no_ratio() {
                return Ok(Settlement::Skipped);
            }

            let (balance, cost) = match engine.try_consume_credits(&current, section, size_bytes) {
                Debit::Approved { cost: 0, .. } => return Ok(Settlement::Free),
                Debit::Approved { balance, cost } => (balance, cost),
                Debit::Insufficient { balance, cost } => {
                    tracing::debug!(
                        user = %current.name(),
                        section = %section,
                        balance,
                        cost,
                        "download charge declined"
                    );
                    return Ok(Settlement::Declined { balance, cost });
                }
            };

            match self.store.try_update_user(current.with_credits_kb(balance)).await? {
                UpdateOutcome::Committed(stored) => {
                    tracing::info!(
                        user = %stored.name(),
                        section = %section,
                        kb = cost,
                        balance = stored.credits_kb(),
                        "debited download"
                    );
                    return Ok(Settlement::Committed {
                        user: stored,
                        delta: cost,
                    });
                }
                UpdateOutcome::Conflict { current: fresh } => {
                    current = self.refresh(user.id(), fresh)?;
                }
            }
        }

        Err(self.contention(user))
    }

    /// Credit a completed upload. No-ratio users are credited too.
    pub async fn apply_upload(
        &self,
        user: &User,
        section: &str,
        size_bytes: u64,
    ) -> AccountingResult<Settlement> {
        let AccountingMode::Enabled(engine) = &self.mode else {
            return Ok(Settlement::Skipped);
        };

        let mut current = user.clone();
        for _ in 0..self.max_attempts {
            let balance = engine.award_credits(&current, section, size_bytes);
            let earned = balance - current.credits_kb();
            if earned == 0 {
                return Ok(Settlement::Free);
            }

            match self.store.try_update_user(current.with_credits_kb(balance)).await? {
                UpdateOutcome::Committed(stored) => {
                    tracing::info!(
                        user = %stored.name(),
                        section = %section,
                        kb = earned,
                        balance = stored.credits_kb(),
                        "credited upload"
                    );
                    return Ok(Settlement::Committed {
                        user: stored,
                        delta: earned,
                    });
                }
                UpdateOutcome::Conflict { current: fresh } => {
                    current = self.refresh(user.id(), fresh)?;
                }
            }
        }

        Err(self.contention(user))
    }

    fn refresh(&self, id: UserId, fresh: Option<User>) -> AccountingResult<User> {
        let fresh = fresh.ok_or(AccountingError::UnknownUser(id))?;
        tracing::debug!(user = %fresh.name(), revision = fresh.revision(), "retrying after conflict");
        Ok(fresh)
    }

    fn contention(&self, user: &User) -> AccountingError {
        tracing::warn!(
            user = %user.name(),
            attempts = self.max_attempts,
            "balance update contention"
        );
        AccountingError::Contention {
            user: user.name().to_string(),
            attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use amftpd_types::{Group, Multiplier};

    use crate::catalog::{Catalog, SharedCatalog};
    use crate::store::{MemoryUserStore, StoreResult};

    fn engine() -> RatioEngine {
        let catalog = Catalog::new(
            vec![
                Section::new("linux", "/linux").with_download(Multiplier::from_milli(2000)),
                Section::new("mp3", "/mp3").with_download(Multiplier::from_milli(3000)),
                Section::new("free", "/free").with_download(Multiplier::ZERO),
                Section::new("half", "/half").with_download(Multiplier::from_milli(500)),
                Section::new("archive", "/archive").with_gates(false, true),
            ],
            vec![Group::new("vip").with_override("mp3", Multiplier::ONE)],
        );
        RatioEngine::new(SharedCatalog::new(catalog))
    }

    async fn setup(user: User) -> (AccountingFacade, User) {
        let store = Arc::new(MemoryUserStore::new());
        let user = store.insert_user(user).await.unwrap();
        (AccountingFacade::enabled(engine(), store), user)
    }

    async fn stored(facade: &AccountingFacade, user: &User) -> User {
        facade.store().get_user(user.id()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_insufficient_credits_denied_and_unchanged() {
        // balance 5, cost 3 kb * 2 = 6
        let (facade, alice) = setup(User::new("alice").with_credits_kb(5)).await;

        let verdict = facade.can_download(&alice, "linux", 3 * 1024);
        assert_eq!(verdict, Verdict::Denied(DenialReason::InsufficientCredits));
        assert_eq!(verdict.reason().as_deref(), Some("insufficient credits"));

        let settlement = facade.apply_download(&alice, "linux", 3 * 1024).await.unwrap();
        assert_eq!(settlement, Settlement::Declined { balance: 5, cost: 6 });
        assert_eq!(stored(&facade, &alice).await.credits_kb(), 5);
    }

    #[tokio::test]
    async fn test_download_debits_and_persists() {
        let (facade, alice) = setup(User::new("alice").with_credits_kb(10)).await;

        assert!(facade.can_download(&alice, "linux", 3 * 1024).is_allowed());
        let settlement = facade.apply_download(&alice, "linux", 3 * 1024).await.unwrap();
        let Settlement::Committed { user, delta } = settlement else {
            panic!("expected commit");
        };
        assert_eq!(delta, 6);
        assert_eq!(user.credits_kb(), 4);
        assert_eq!(stored(&facade, &alice).await, user);
    }

    #[tokio::test]
    async fn test_no_ratio_asymmetry() {
        let (facade, root) = setup(User::new("root").with_no_ratio(true)).await;

        // Never denied, never debited.
        assert!(facade.can_download(&root, "linux", 1 << 30).is_allowed());
        let down = facade.apply_download(&root, "linux", 1 << 30).await.unwrap();
        assert_eq!(down, Settlement::Skipped);
        assert_eq!(stored(&facade, &root).await.credits_kb(), 0);

        // Still credited on upload.
        let up = facade.apply_upload(&root, "linux", 4 * 1024).await.unwrap();
        assert!(matches!(up, Settlement::Committed { delta: 4, .. }));
        assert_eq!(stored(&facade, &root).await.credits_kb(), 4);
    }

    #[tokio::test]
    async fn test_disabled_mode_is_inert() {
        let store = Arc::new(MemoryUserStore::new());
        let bob = store.insert_user(User::new("bob").with_credits_kb(1)).await.unwrap();
        let facade = AccountingFacade::disabled(store);

        assert!(!facade.is_enabled());
        assert!(facade.can_download(&bob, "linux", 1 << 40).is_allowed());
        assert_eq!(facade.apply_download(&bob, "linux", 1 << 40).await.unwrap(), Settlement::Skipped);
        assert_eq!(facade.apply_upload(&bob, "linux", 1 << 20).await.unwrap(), Settlement::Skipped);
        assert_eq!(stored(&facade, &bob).await.credits_kb(), 1);
    }

    #[tokio::test]
    async fn test_group_override_used_for_charge() {
        let user = User::new("vip").with_credits_kb(10).with_group(Some("vip".into()));
        let (facade, vip) = setup(user).await;
        let settlement = facade.apply_download(&vip, "mp3", 10 * 1024).await.unwrap();
        assert!(matches!(settlement, Settlement::Committed { delta: 10, .. }));
        assert_eq!(stored(&facade, &vip).await.credits_kb(), 0);
    }

    #[tokio::test]
    async fn test_small_download_at_fractional_rate_is_charged() {
        let (facade, alice) = setup(User::new("alice").with_credits_kb(3)).await;
        let settlement = facade.apply_download(&alice, "half", 500).await.unwrap();
        assert!(matches!(settlement, Settlement::Committed { delta: 1, .. }));
        assert_eq!(stored(&facade, &alice).await.credits_kb(), 2);
    }

    #[tokio::test]
    async fn test_free_and_unknown_sections_write_nothing() {
        let (facade, alice) = setup(User::new("alice").with_credits_kb(3)).await;
        assert_eq!(facade.apply_download(&alice, "free", 4096).await.unwrap(), Settlement::Free);
        assert_eq!(facade.apply_download(&alice, "nope", 4096).await.unwrap(), Settlement::Free);
        assert_eq!(facade.apply_upload(&alice, "nope", 4096).await.unwrap(), Settlement::Free);
        assert_eq!(stored(&facade, &alice).await.revision(), 0);
    }

    #[tokio::test]
    async fn test_stale_user_retries_against_fresh_balance() {
        let (facade, alice) = setup(User::new("alice").with_credits_kb(10)).await;

        // A concurrent session already spent 6.
        facade.apply_download(&alice, "linux", 3 * 1024).await.unwrap();

        // This caller still holds the stale 10-credit record.
        let settlement = facade.apply_download(&alice, "linux", 3 * 1024).await.unwrap();
        assert_eq!(settlement, Settlement::Declined { balance: 4, cost: 6 });
        assert_eq!(stored(&facade, &alice).await.credits_kb(), 4);
    }

    #[tokio::test]
    async fn test_stale_user_upload_not_lost() {
        let (facade, alice) = setup(User::new("alice").with_credits_kb(0)).await;
        facade.apply_upload(&alice, "linux", 2048).await.unwrap();
        facade.apply_upload(&alice, "linux", 2048).await.unwrap();
        assert_eq!(stored(&facade, &alice).await.credits_kb(), 4);
    }

    #[tokio::test]
    async fn test_vanished_user_is_an_error() {
        let store = Arc::new(MemoryUserStore::new());
        let facade = AccountingFacade::enabled(engine(), store);
        let ghost = User::new("ghost").with_credits_kb(100);
        let result = facade.apply_download(&ghost, "linux", 1024).await;
        assert!(matches!(result, Err(AccountingError::UnknownUser(id)) if id == ghost.id()));
    }

    /// A store that always loses the race, or always fails.
    struct HostileStore {
        fail: bool,
    }

    #[async_trait]
    impl UserStore for HostileStore {
        fn name(&self) -> &str {
            "hostile"
        }
        async fn get_user(&self, _id: UserId) -> StoreResult<Option<User>> {
            Ok(None)
        }
        async fn find_user(&self, _name: &str) -> StoreResult<Option<User>> {
            Ok(None)
        }
        async fn insert_user(&self, user: User) -> StoreResult<User> {
            Ok(user)
        }
        async fn list_users(&self) -> StoreResult<Vec<User>> {
            Ok(Vec::new())
        }
        async fn try_update_user(&self, user: User) -> StoreResult<UpdateOutcome> {
            if self.fail {
                Err(StoreError::Other("disk full".into()))
            } else {
                Ok(UpdateOutcome::Conflict { current: Some(user) })
            }
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let facade = AccountingFacade::enabled(engine(), Arc::new(HostileStore { fail: true }));
        let alice = User::new("alice").with_credits_kb(100);
        let result = facade.apply_upload(&alice, "linux", 1024).await;
        assert!(matches!(result, Err(AccountingError::Store(_))));
        let result = facade.apply_download(&alice, "linux", 1024).await;
        assert!(matches!(result, Err(AccountingError::Store(_))));
    }

    #[tokio::test]
    async fn test_endless_conflicts_give_up() {
        let facade = AccountingFacade::enabled(engine(), Arc::new(HostileStore { fail: false }))
            .with_max_attempts(3);
        let alice = User::new("alice").with_credits_kb(100);
        let result = facade.apply_download(&alice, "linux", 1024).await;
        assert!(matches!(result, Err(AccountingError::Contention { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_access_decision() {
        let (facade, broke) = setup(User::new("broke")).await;
        let catalog = match facade.mode() {
            AccountingMode::Enabled(engine) => engine.catalog().load(),
            AccountingMode::Disabled => unreachable!(),
        };
        let resolver = catalog.resolver();

        assert_eq!(facade.access(resolver.resolve("/nowhere"), &broke), AccessDecision::deny_all());

        let linux = facade.access(resolver.resolve("/linux/a.iso"), &broke);
        assert!(linux.can_list && linux.can_upload);
        assert!(!linux.can_download); // cannot afford 1 kb * 2

        let free = facade.access(resolver.resolve("/free/x"), &broke);
        assert!(free.can_download);

        let rich = broke.with_credits_kb(2);
        let archive = facade.access(resolver.resolve("/archive/old"), &rich);
        assert!(!archive.can_upload);
        assert!(archive.can_download);
    }

    #[tokio::test]
    async fn test_access_disabled_mode() {
        let facade = AccountingFacade::disabled(MemoryUserStore::shared());
        let section = Section::new("linux", "/linux");
        let decision = facade.access(Some(&section), &User::new("x"));
        assert!(decision.can_list && decision.can_upload && decision.can_download);
    }
}
