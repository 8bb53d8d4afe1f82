//! Section resolver with longest-root routing.

use std::collections::HashSet;
use std::sync::Arc;

use amftpd_types::Section;

/// A section together with its lowercase, normalized root.
#[derive(Debug, Clone)]
struct RootEntry {
    key: String,
    section: Arc<Section>,
}

/// Maps virtual paths to the most specific configured section.
///
/// Built once per configuration generation. For example, if `/linux` and
/// `/linux/iso` are both configured, `/linux/iso/disk1.iso` resolves to the
/// `/linux/iso` section and `/linux/other` to `/linux`.
#[derive(Debug, Clone, Default)]
pub struct SectionResolver {
    /// Sorted by descending key length; ties keep configuration order.
    entries: Vec<RootEntry>,
}

impl SectionResolver {
    /// Build a resolver from the configured sections.
    pub fn new<I, S>(sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<Section>>,
    {
        let mut entries: Vec<RootEntry> = sections
            .into_iter()
            .map(|section| {
                let section = section.into();
                RootEntry {
                    key: Self::normalize_root(&section.root).to_lowercase(),
                    section,
                }
            })
            .collect();

        // Stable sort: among equal-length roots the first configured wins.
        entries.sort_by(|a, b| b.key.len().cmp(&a.key.len()));

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.key.as_str()) {
                tracing::warn!(
                    root = %entry.key,
                    shadowed = %entry.section.name,
                    "duplicate section root"
                );
            }
        }

        Self { entries }
    }

    /// Resolve a virtual path to its governing section.
    ///
    /// Returns `None` for a blank path or when no root matches.
    pub fn resolve(&self, path: &str) -> Option<&Section> {
        self.find_entry(path).map(|entry| entry.section.as_ref())
    }

    /// Like [`resolve`](Self::resolve) but hands out the shared record.
    pub fn resolve_shared(&self, path: &str) -> Option<Arc<Section>> {
        self.find_entry(path).map(|entry| Arc::clone(&entry.section))
    }

    fn find_entry(&self, path: &str) -> Option<&RootEntry> {
        if path.trim().is_empty() {
            return None;
        }
        let normalized = Self::normalize_path(path).to_lowercase();

        self.entries
            .iter()
            .find(|entry| Self::root_matches(&entry.key, &normalized))
    }

    /// Sections in match order (most specific root first).
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.entries.iter().map(|e| e.section.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plain case-folded prefix test: `/linux` covers `/linux/x` and also
    /// `/linuxfoo`. Both sides are already lowercased and normalized.
    fn root_matches(root: &str, path: &str) -> bool {
        path.starts_with(root)
    }

    /// Normalize a request path: `\` becomes `/` and a leading `/` is ensured.
    fn normalize_path(path: &str) -> String {
        let s = path.replace('\\', "/");
        if s.starts_with('/') {
            s
        } else {
            format!("/{s}")
        }
    }

    /// Normalize a configured root: as for paths, plus trailing separators
    /// stripped. The bare root stays `/`.
    fn normalize_root(root: &str) -> String {
        let s = Self::normalize_path(root.trim());
        let s = s.trim_end_matches('/');
        if s.is_empty() {
            "/".to_string()
        } else {
            s.to_string()
        }
    }
}
