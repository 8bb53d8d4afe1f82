//! # amftpd-core
//!
//! The access-accounting engine of the amftpd FTP daemon.
//!
//! Every transfer request touches this crate twice:
//! - the session layer resolves the virtual path to its governing
//!   [`Section`] through a [`SectionResolver`] (filesystem decisions), and
//! - it hands the section *name* to the [`AccountingFacade`], which prices
//!   the transfer with the [`RatioEngine`] and commits the balance change
//!   through a [`UserStore`].
//!
//! The crate holds no locks of its own around user balances. All shared
//! mutable state lives behind the store's compare-and-update contract, and
//! section/group definitions are immutable per configuration generation
//! (see [`SharedCatalog`]).

pub mod accounting;
pub mod catalog;
pub mod config;
pub mod ratio;
pub mod sections;
pub mod store;

pub use accounting::{
    AccountingError, AccountingFacade, AccountingMode, AccountingResult, DenialReason, Settlement,
    Verdict,
};
pub use catalog::{Catalog, SharedCatalog};
pub use config::{load_config, load_config_file, AccountingConfig, ConfigError, StoreConfig};
pub use ratio::{Debit, Quote, RatioEngine};
pub use sections::SectionResolver;
pub use store::{
    MemoryUserStore, SqliteUserStore, StoreError, StoreFactory, StoreRegistry, StoreResult,
    UpdateOutcome, UserStore,
};

pub use amftpd_types::{AccessDecision, Group, Multiplier, Section, User, UserId};
