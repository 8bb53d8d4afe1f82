//! Section and group records.
//!
//! A `Section` is identified two ways: by its virtual `root` for path
//! resolution and by its canonical `name` for accounting. Both are fixed at
//! load time. A `Group` holds at most one override multiplier per section
//! name; the override replaces both the upload and download factor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::multiplier::Multiplier;

/// A named, path-rooted zone of the virtual filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Canonical name used for accounting lookups.
    pub name: String,
    /// Virtual root used for prefix matching (e.g. `/linux/iso`).
    pub root: String,
    /// Factor applied to uploaded kilobytes to compute the award.
    pub upload: Multiplier,
    /// Factor applied to downloaded kilobytes to compute the cost.
    pub download: Multiplier,
    #[serde(default = "default_true")]
    pub allow_upload: bool,
    #[serde(default = "default_true")]
    pub allow_download: bool,
}

fn default_true() -> bool {
    true
}

impl Section {
    /// Create a section with 1:1 multipliers.
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            upload: Multiplier::ONE,
            download: Multiplier::ONE,
            allow_upload: true,
            allow_download: true,
        }
    }

    pub fn with_upload(mut self, upload: Multiplier) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_download(mut self, download: Multiplier) -> Self {
        self.download = download;
        self
    }

    /// Mark the section as upload-only or download-only.
    pub fn with_gates(mut self, allow_upload: bool, allow_download: bool) -> Self {
        self.allow_upload = allow_upload;
        self.allow_download = allow_download;
        self
    }
}

/// A user group with per-section multiplier overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    /// Section name → override. Keyed by canonical section name only.
    #[serde(default)]
    pub overrides: HashMap<String, Multiplier>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overrides: HashMap::new(),
        }
    }

    /// Register an override for a section.
    pub fn with_override(mut self, section: impl Into<String>, multiplier: Multiplier) -> Self {
        self.overrides.insert(section.into(), multiplier);
        self
    }

    /// The override registered for `section`, if any.
    pub fn override_for(&self, section: &str) -> Option<Multiplier> {
        self.overrides.get(section).copied()
    }
}

/// What a user may do inside a resolved section. Derived per request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub can_list: bool,
    pub can_upload: bool,
    pub can_download: bool,
}

impl AccessDecision {
    /// Everything denied. Used when no section governs the path.
    pub const fn deny_all() -> Self {
        Self {
            can_list: false,
            can_upload: false,
            can_download: false,
        }
    }
}
