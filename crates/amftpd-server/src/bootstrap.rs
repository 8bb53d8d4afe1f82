//! Composition root: turns configuration into a live accounting stack.
//!
//! Everything that needs wiring happens here, in one place and in a fixed
//! order: store backends are registered explicitly, the configured one is
//! opened, the catalog is built, and the facade is assembled in enabled or
//! disabled mode. Nothing self-registers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use amftpd_core::{
    AccountingConfig, AccountingFacade, Catalog, ConfigError, RatioEngine, SharedCatalog,
    StoreConfig, StoreError, StoreRegistry, UserStore, load_config, load_config_file,
};

use crate::constants::{DEFAULT_CONFIG, DEFAULT_CONFIG_PATH};

/// Error type for startup and reload.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Embedded,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Embedded => f.write_str("<embedded defaults>"),
        }
    }
}

/// Load configuration.
///
/// An explicit path must exist. Without one, the default path is used if
/// present, and the embedded defaults otherwise.
pub fn load(explicit: Option<&Path>) -> Result<(AccountingConfig, ConfigSource), ConfigError> {
    if let Some(path) = explicit {
        let path = expand(path);
        let config = load_config_file(&path)?;
        return Ok((config, ConfigSource::File(path)));
    }

    let default_path = PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref());
    if default_path.exists() {
        let config = load_config_file(&default_path)?;
        return Ok((config, ConfigSource::File(default_path)));
    }

    tracing::debug!(path = %default_path.display(), "no config file, using embedded defaults");
    Ok((load_config(DEFAULT_CONFIG)?, ConfigSource::Embedded))
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Registry with every backend this binary ships.
pub fn store_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();
    registry.register_builtin();
    registry
}

/// Open the configured store, creating the database directory if needed.
pub fn open_store(
    registry: &StoreRegistry,
    config: &StoreConfig,
) -> Result<Arc<dyn UserStore>, BootstrapError> {
    let parent = config.path.as_deref().and_then(Path::parent);
    if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| BootstrapError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(registry.open(config)?)
}

/// The assembled accounting stack.
#[derive(Clone)]
pub struct Accounting {
    pub catalog: SharedCatalog,
    pub store: Arc<dyn UserStore>,
    pub facade: AccountingFacade,
}

impl std::fmt::Debug for Accounting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounting")
            .field("store", &self.store.name())
            .field("facade", &self.facade)
            .finish_non_exhaustive()
    }
}

impl Accounting {
    /// Wire a stack from configuration using the given registry.
    pub fn build(config: &AccountingConfig, registry: &StoreRegistry) -> Result<Self, BootstrapError> {
        let store = open_store(registry, &config.store)?;
        Ok(Self::with_store(config, store))
    }

    /// Wire a stack around an already-open store.
    pub fn with_store(config: &AccountingConfig, store: Arc<dyn UserStore>) -> Self {
        let catalog = SharedCatalog::new(config.catalog());
        let facade = if config.ratio_enabled {
            AccountingFacade::enabled(RatioEngine::new(catalog.clone()), store.clone())
        } else {
            tracing::info!("ratio enforcement disabled");
            AccountingFacade::disabled(store.clone())
        };

        tracing::info!(
            sections = config.sections.len(),
            groups = config.groups.len(),
            store = %store.name(),
            ratio_enabled = config.ratio_enabled,
            "accounting ready"
        );

        Self {
            catalog,
            store,
            facade,
        }
    }

    /// Current catalog generation.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.load()
    }

    /// Swap in the sections and groups of a new configuration.
    ///
    /// The store and the enabled/disabled mode are fixed for the life of the
    /// process; a reload that changes them only takes effect on restart.
    pub fn reload(&self, config: &AccountingConfig) {
        if config.ratio_enabled != self.facade.is_enabled() {
            tracing::warn!(
                ratio_enabled = config.ratio_enabled,
                "ratio_enabled changed; restart to apply"
            );
        }
        if config.store.backend != self.store.name() {
            tracing::warn!(
                backend = %config.store.backend,
                "store backend changed; restart to apply"
            );
        }
        self.catalog.swap(config.catalog());
    }
}
