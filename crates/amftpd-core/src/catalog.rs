//! Immutable section/group catalog and its swappable handle.
//!
//! A [`Catalog`] is one configuration generation: the section list (for
//! path resolution) plus name-keyed section and group tables (for
//! accounting). It is never edited. A reload builds a new catalog and
//! [`SharedCatalog::swap`]s it in wholesale; readers holding the old
//! `Arc<Catalog>` finish their computation against the old generation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use amftpd_types::{Group, Section};

use crate::sections::SectionResolver;

/// One immutable configuration generation.
#[derive(Debug, Default)]
pub struct Catalog {
    resolver: SectionResolver,
    sections: HashMap<String, Arc<Section>>,
    groups: HashMap<String, Arc<Group>>,
}

impl Catalog {
    /// Build a catalog. When two sections share a name, the first wins.
    pub fn new(sections: Vec<Section>, groups: Vec<Group>) -> Self {
        let sections: Vec<Arc<Section>> = sections.into_iter().map(Arc::new).collect();

        let mut by_name = HashMap::with_capacity(sections.len());
        for section in &sections {
            if by_name.contains_key(&section.name) {
                tracing::warn!(section = %section.name, "duplicate section name ignored");
                continue;
            }
            by_name.insert(section.name.clone(), Arc::clone(section));
        }

        let groups = groups
            .into_iter()
            .map(|g| (g.name.clone(), Arc::new(g)))
            .collect();

        Self {
            resolver: SectionResolver::new(sections),
            sections: by_name,
            groups,
        }
    }

    /// Path-based resolver for this generation.
    pub fn resolver(&self) -> &SectionResolver {
        &self.resolver
    }

    /// Look up a section by canonical name. Absence is a normal outcome.
    pub fn find_section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.get(name).map(Arc::as_ref)
    }

    /// Look up a group by name. Absence is a normal outcome.
    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name).map(Arc::as_ref)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Group names, sorted.
    pub fn group_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Thread-safe handle to the current catalog generation.
///
/// Cloning shares the handle; every clone observes the same swaps.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl SharedCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Snapshot of the current generation.
    pub fn load(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current generation, returning the previous one.
    pub fn swap(&self, catalog: Catalog) -> Arc<Catalog> {
        tracing::info!(
            sections = catalog.section_count(),
            groups = catalog.group_count(),
            "catalog generation swapped"
        );
        std::mem::replace(&mut *self.current.write(), Arc::new(catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amftpd_types::Multiplier;

    fn catalog() -> Catalog {
        Catalog::new(
            vec![Section::new("linux", "/linux"), Section::new("iso", "/linux/iso")],
            vec![Group::new("staff").with_override("linux", Multiplier::ZERO)],
        )
    }

    #[test]
    fn test_name_lookups() {
        let c = catalog();
        assert_eq!(c.find_section_by_name("iso").unwrap().root, "/linux/iso");
        assert!(c.find_section_by_name("ISO").is_none());
        assert!(c.find_group("staff").is_some());
        assert!(c.find_group("nobody").is_none());
    }

    #[test]
    fn test_resolver_and_name_table_agree() {
        let c = catalog();
        let by_path = c.resolver().resolve("/linux/iso/x").unwrap();
        let by_name = c.find_section_by_name(&by_path.name).unwrap();
        assert_eq!(by_path, by_name);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let c = Catalog::new(
            vec![Section::new("a", "/one"), Section::new("a", "/two")],
            vec![],
        );
        assert_eq!(c.section_count(), 1);
        assert_eq!(c.find_section_by_name("a").unwrap().root, "/one");
    }

    #[test]
    fn test_swap_is_wholesale() {
        let shared = SharedCatalog::new(catalog());
        let before = shared.load();

        let previous = shared.swap(Catalog::new(vec![Section::new("mp3", "/mp3")], vec![]));

        // Holders of the old generation still see it intact.
        assert!(Arc::ptr_eq(&before, &previous));
        assert!(before.find_section_by_name("linux").is_some());

        let after = shared.load();
        assert!(after.find_section_by_name("linux").is_none());
        assert!(after.find_section_by_name("mp3").is_some());
    }

    #[test]
    fn test_clones_share_generation() {
        let a = SharedCatalog::new(catalog());
        let b = a.clone();
        a.swap(Catalog::default());
        assert_eq!(b.load().section_count(), 0);
    }
}
