//! Rhai-driven accounting configuration.
//!
//! Evaluates `amftpd.rhai` scripts and extracts sections, groups, the
//! ratio switch and the user-store backend. The result is a plain
//! [`AccountingConfig`]; turning it into a live [`Catalog`] is a separate
//! step so a reload can be validated before it is swapped in.
//!
//! ```rhai
//! let ratio_enabled = true;
//!
//! let sections = #{
//!     root:  #{ root: "/" },
//!     linux: #{ root: "/linux", upload: 3, download: 1 },
//!     iso:   #{ root: "/linux/iso", download: "1.5", allow_upload: false },
//! };
//!
//! let groups = #{
//!     staff: #{ overrides: #{ linux: 0 } },
//! };
//!
//! let store = #{ backend: "sqlite", path: "~/.local/share/amftpd/users.db" };
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use amftpd_types::{Group, Multiplier, Section};

use crate::catalog::Catalog;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config evaluation error: {0}")]
    Eval(String),

    /// The script defines no `sections` at all. Fatal at startup.
    #[error("no sections configured")]
    MissingSections,

    #[error("invalid section '{name}': {reason}")]
    InvalidSection { name: String, reason: String },

    #[error("invalid group '{name}': {reason}")]
    InvalidGroup { name: String, reason: String },

    #[error("invalid store configuration: {0}")]
    InvalidStore(String),

    /// A top-level setting has the wrong type.
    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
}

/// Which user-store backend to open, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Registry name of the backend ("memory", "sqlite", ...).
    pub backend: String,
    /// Backend location, for backends that need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: "memory".into(),
            path: None,
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: "sqlite".into(),
            path: Some(path.into()),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

/// Structured accounting configuration extracted from a Rhai script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// When false the daemon runs without ratio enforcement.
    pub ratio_enabled: bool,
    pub sections: Vec<Section>,
    pub groups: Vec<Group>,
    pub store: StoreConfig,
}

impl AccountingConfig {
    /// Build the immutable catalog for this configuration generation.
    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.sections.clone(), self.groups.clone())
    }
}

/// Read and parse a configuration file.
pub fn load_config_file(path: &Path) -> Result<AccountingConfig, ConfigError> {
    let script = std::fs::read_to_string(path)?;
    let config = load_config(&script)?;
    tracing::info!(
        path = %path.display(),
        sections = config.sections.len(),
        groups = config.groups.len(),
        ratio_enabled = config.ratio_enabled,
        "loaded config"
    );
    Ok(config)
}

/// Parse an `amftpd.rhai` script.
pub fn load_config(script: &str) -> Result<AccountingConfig, ConfigError> {
    let engine = rhai::Engine::new();
    let ast = engine
        .compile(script)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut scope = rhai::Scope::new();
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| ConfigError::Eval(e.to_string()))?;

    let ratio_enabled = extract_ratio_enabled(&scope)?;
    let sections = extract_sections(&scope)?;
    let groups = extract_groups(&scope)?;
    let store = extract_store(&scope)?;

    Ok(AccountingConfig {
        ratio_enabled,
        sections,
        groups,
        store,
    })
}

fn extract_ratio_enabled(scope: &rhai::Scope) -> Result<bool, ConfigError> {
    let Some(value) = scope.get_value::<rhai::Dynamic>("ratio_enabled") else {
        return Ok(true);
    };
    value.as_bool().map_err(|_| ConfigError::InvalidSetting {
        name: "ratio_enabled".into(),
        reason: format!("expected a bool, got {}", value.type_name()),
    })
}

fn extract_sections(scope: &rhai::Scope) -> Result<Vec<Section>, ConfigError> {
    if !scope.contains("sections") {
        return Err(ConfigError::MissingSections);
    }
    let Some(sections_map) = scope.get_value::<rhai::Map>("sections") else {
        return Err(ConfigError::InvalidSection {
            name: "sections".into(),
            reason: "expected a map of section definitions".into(),
        });
    };

    let mut sections = Vec::with_capacity(sections_map.len());
    for (name, value) in &sections_map {
        let name = name.to_string();
        let invalid = |reason: String| ConfigError::InvalidSection {
            name: name.clone(),
            reason,
        };

        let Some(map) = value.clone().try_cast::<rhai::Map>() else {
            return Err(invalid("expected a map".into()));
        };

        let root = get_string(&map, "root")
            .map_err(&invalid)?
            .ok_or_else(|| invalid("missing root".into()))?;
        if root.trim().is_empty() {
            return Err(invalid("root is empty".into()));
        }

        let upload = get_multiplier(&map, "upload").map_err(&invalid)?;
        let download = get_multiplier(&map, "download").map_err(&invalid)?;
        let allow_upload = get_bool(&map, "allow_upload").map_err(&invalid)?.unwrap_or(true);
        let allow_download = get_bool(&map, "allow_download").map_err(&invalid)?.unwrap_or(true);

        sections.push(
            Section::new(name, root)
                .with_upload(upload.unwrap_or(Multiplier::ONE))
                .with_download(download.unwrap_or(Multiplier::ONE))
                .with_gates(allow_upload, allow_download),
        );
    }
    Ok(sections)
}

fn extract_groups(scope: &rhai::Scope) -> Result<Vec<Group>, ConfigError> {
    let Some(groups_map) = scope.get_value::<rhai::Map>("groups") else {
        return Ok(Vec::new());
    };

    let mut groups = Vec::with_capacity(groups_map.len());
    for (name, value) in &groups_map {
        let name = name.to_string();
        let invalid = |reason: String| ConfigError::InvalidGroup {
            name: name.clone(),
            reason,
        };

        let Some(map) = value.clone().try_cast::<rhai::Map>() else {
            return Err(invalid("expected a map".into()));
        };

        let mut group = Group::new(name.clone());
        if let Some(overrides) = map.get("overrides") {
            let Some(overrides) = overrides.clone().try_cast::<rhai::Map>() else {
                return Err(invalid("overrides must be a map".into()));
            };
            for (section, value) in &overrides {
                let multiplier = to_multiplier(value)
                    .map_err(|reason| invalid(format!("override for {section}: {reason}")))?;
                group = group.with_override(section.to_string(), multiplier);
            }
        }
        groups.push(group);
    }
    Ok(groups)
}

fn extract_store(scope: &rhai::Scope) -> Result<StoreConfig, ConfigError> {
    let Some(map) = scope.get_value::<rhai::Map>("store") else {
        return Ok(StoreConfig::default());
    };

    let backend = get_string(&map, "backend")
        .map_err(ConfigError::InvalidStore)?
        .unwrap_or_else(|| "memory".to_string());
    if backend.trim().is_empty() {
        return Err(ConfigError::InvalidStore("backend is empty".into()));
    }
    let path = get_string(&map, "path")
        .map_err(ConfigError::InvalidStore)?
        .map(|p| PathBuf::from(shellexpand::tilde(&p).as_ref()));

    Ok(StoreConfig { backend, path })
}

/// `Ok(None)` when absent; an error naming the key when present with the
/// wrong type.
fn get_string(map: &rhai::Map, key: &str) -> Result<Option<String>, String> {
    map.get(key)
        .map(|v| {
            v.clone()
                .into_string()
                .map_err(|got| format!("{key}: expected a string, got {got}"))
        })
        .transpose()
}

fn get_bool(map: &rhai::Map, key: &str) -> Result<Option<bool>, String> {
    map.get(key)
        .map(|v| {
            v.as_bool()
                .map_err(|got| format!("{key}: expected a bool, got {got}"))
        })
        .transpose()
}

fn get_multiplier(map: &rhai::Map, key: &str) -> Result<Option<Multiplier>, String> {
    map.get(key)
        .map(|v| to_multiplier(v).map_err(|reason| format!("{key}: {reason}")))
        .transpose()
}

/// Accepts integers, floats, and decimal strings.
fn to_multiplier(value: &rhai::Dynamic) -> Result<Multiplier, String> {
    if let Ok(i) = value.as_int() {
        let whole = u32::try_from(i).map_err(|_| format!("out of range or negative: {i}"))?;
        return Multiplier::whole(whole).map_err(|e| e.to_string());
    }
    if let Ok(f) = value.as_float() {
        return Multiplier::from_f64(f).map_err(|e| e.to_string());
    }
    if value.is_string() {
        let s = value.clone().into_string().map_err(|e| e.to_string())?;
        return s.parse().map_err(|e: amftpd_types::MultiplierError| e.to_string());
    }
    Err(format!("expected a number, got {}", value.type_name()))
}
