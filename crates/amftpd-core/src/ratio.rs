//! Ratio policy: credit cost of downloads and credit award for uploads.
//!
//! The engine is stateless apart from its handle on the catalog. Every
//! computation works from one catalog snapshot, so a concurrent reload is
//! never observed half-way through a quote.
//!
//! # Pricing
//!
//! ```text
//! kb        = max(1, floor(size_bytes / 1024))    (0 for an empty transfer)
//! factor    = group override for the section, if the user's group has one
//!           | section.download (cost) / section.upload (award)
//! delta     = max(1, floor(kb * factor))         (0 when kb or factor is 0)
//! ```
//!
//! An override *replaces* the section factor. It is never added to or
//! multiplied with it. Sections are looked up by canonical name; an unknown
//! name prices at zero but is reported as [`Quote::UnknownSection`] so it
//! cannot be mistaken for a free section.

use amftpd_types::{size_to_kb, Multiplier, Section, User};

use crate::catalog::{Catalog, SharedCatalog};

/// Outcome of pricing a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    /// The section was found; `kb` is the computed delta.
    Priced { kb: u64, multiplier: Multiplier },
    /// No section with that name exists in the current catalog.
    UnknownSection,
}

impl Quote {
    /// The credit delta. Zero for an unknown section.
    pub fn kb(&self) -> u64 {
        match self {
            Quote::Priced { kb, .. } => *kb,
            Quote::UnknownSection => 0,
        }
    }

    pub fn is_unknown_section(&self) -> bool {
        matches!(self, Quote::UnknownSection)
    }
}

/// Outcome of attempting to debit a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debit {
    /// Affordable; `balance` is what remains after the charge.
    Approved { balance: u64, cost: u64 },
    /// Not affordable; `balance` is unchanged.
    Insufficient { balance: u64, cost: u64 },
}

impl Debit {
    pub fn is_approved(&self) -> bool {
        matches!(self, Debit::Approved { .. })
    }

    /// Balance after the attempt (unchanged when insufficient).
    pub fn balance(&self) -> u64 {
        match self {
            Debit::Approved { balance, .. } | Debit::Insufficient { balance, .. } => *balance,
        }
    }
}

/// Which multiplier of a section applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Direction {
    Upload,
    Download,
}

/// Computes credit deltas for transfers in named sections.
#[derive(Debug, Clone)]
pub struct RatioEngine {
    catalog: SharedCatalog,
}

impl RatioEngine {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog handle this engine prices against.
    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Credits earned by uploading `size_bytes` into `section`.
    pub fn compute_upload_credit(&self, user: &User, section: &str, size_bytes: u64) -> Quote {
        self.quote(user, section, size_bytes, Direction::Upload)
    }

    /// Credits charged for downloading `size_bytes` from `section`.
    pub fn compute_download_cost(&self, user: &User, section: &str, size_bytes: u64) -> Quote {
        self.quote(user, section, size_bytes, Direction::Download)
    }

    /// Whether the user's balance covers the download.
    pub fn can_download(&self, user: &User, section: &str, size_bytes: u64) -> bool {
        self.compute_download_cost(user, section, size_bytes).kb() <= user.credits_kb()
    }

    /// Compute the post-download balance, or report that it isn't affordable.
    ///
    /// Pure: the caller decides whether and how to persist.
    pub fn try_consume_credits(&self, user: &User, section: &str, size_bytes: u64) -> Debit {
        let cost = self.compute_download_cost(user, section, size_bytes).kb();
        let balance = user.credits_kb();
        match balance.checked_sub(cost) {
            Some(remaining) => Debit::Approved {
                balance: remaining,
                cost,
            },
            None => Debit::Insufficient { balance, cost },
        }
    }

    /// The post-upload balance. Always succeeds; saturates at `u64::MAX`.
    pub fn award_credits(&self, user: &User, section: &str, size_bytes: u64) -> u64 {
        let earned = self.compute_upload_credit(user, section, size_bytes).kb();
        user.credits_kb().saturating_add(earned)
    }

    fn quote(&self, user: &User, section_name: &str, size_bytes: u64, dir: Direction) -> Quote {
        let catalog = self.catalog.load();
        let Some(section) = catalog.find_section_by_name(section_name) else {
            tracing::warn!(
                user = %user.name(),
                section = %section_name,
                direction = %dir,
                "unknown section, pricing at zero"
            );
            return Quote::UnknownSection;
        };

        let multiplier = effective_multiplier(&catalog, user, section, dir);
        let size_kb = size_to_kb(size_bytes);
        let mut kb = multiplier.apply(size_kb);
        if size_kb > 0 && !multiplier.is_zero() {
            // A fractional factor must not make a non-empty transfer free.
            kb = kb.max(1);
        }

        tracing::debug!(
            user = %user.name(),
            section = %section.name,
            direction = %dir,
            size_bytes,
            multiplier = %multiplier,
            kb,
            "priced transfer"
        );
        Quote::Priced { kb, multiplier }
    }
}

/// Group override when present, otherwise the section's own factor.
fn effective_multiplier(
    catalog: &Catalog,
    user: &User,
    section: &Section,
    dir: Direction,
) -> Multiplier {
    let group_override = user
        .group()
        .and_then(|name| catalog.find_group(name))
        .and_then(|group| group.override_for(&section.name));

    match (group_override, dir) {
        (Some(m), _) => m,
        (None, Direction::Upload) => section.upload,
        (None, Direction::Download) => section.download,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amftpd_types::Group;

    fn m(s: &str) -> Multiplier {
        s.parse().unwrap()
    }

    fn engine() -> RatioEngine {
        let catalog = Catalog::new(
            vec![
                Section::new("linux", "/linux")
                    .with_upload(m("3"))
                    .with_download(m("2")),
                Section::new("mp3", "/mp3").with_download(m("3")),
                Section::new("free", "/free").with_download(Multiplier::ZERO),
                Section::new("half", "/half").with_download(m("0.5")),
            ],
            vec![
                Group::new("vip").with_override("mp3", m("1")),
                Group::new("staff").with_override("linux", Multiplier::ZERO),
            ],
        );
        RatioEngine::new(SharedCatalog::new(catalog))
    }

    fn user(credits: u64) -> User {
        User::new("alice").with_credits_kb(credits)
    }

    #[test]
    fn test_minimum_charge() {
        // 500 bytes floors to 0 kb, clamped to 1, times 2.
        let e = engine();
        let q = e.compute_download_cost(&user(0), "linux", 500);
        assert_eq!(q.kb(), 2);
        assert_eq!(q, Quote::Priced { kb: 2, multiplier: m("2") });
    }

    #[test]
    fn test_empty_transfer_is_free() {
        let e = engine();
        assert_eq!(e.compute_download_cost(&user(0), "linux", 0).kb(), 0);
        assert_eq!(e.compute_upload_credit(&user(0), "linux", 0).kb(), 0);
    }

    #[test]
    fn test_size_floors_to_kb() {
        let e = engine();
        // 3000 bytes = 2 kb floored
        assert_eq!(e.compute_download_cost(&user(0), "linux", 3000).kb(), 4);
        assert_eq!(e.compute_upload_credit(&user(0), "linux", 3000).kb(), 6);
    }

    #[test]
    fn test_override_replaces_not_stacks() {
        let e = engine();
        let vip = user(0).with_group(Some("vip".into()));
        let q = e.compute_download_cost(&vip, "mp3", 10 * 1024);
        assert_eq!(q.kb(), 10); // x1, not x3 or x4
    }

    #[test]
    fn test_override_applies_to_both_directions() {
        let e = engine();
        let staff = user(0).with_group(Some("staff".into()));
        assert_eq!(e.compute_download_cost(&staff, "linux", 4096).kb(), 0);
        assert_eq!(e.compute_upload_credit(&staff, "linux", 4096).kb(), 0);
    }

    #[test]
    fn test_override_scoped_to_its_section() {
        let e = engine();
        let vip = user(0).with_group(Some("vip".into()));
        assert_eq!(e.compute_download_cost(&vip, "linux", 1024).kb(), 2);
    }

    #[test]
    fn test_unknown_group_means_no_override() {
        let e = engine();
        let ghost = user(0).with_group(Some("ghosts".into()));
        assert_eq!(e.compute_download_cost(&ghost, "mp3", 1024).kb(), 3);
    }

    #[test]
    fn test_unknown_section_distinct_from_free_section() {
        let e = engine();
        let unknown = e.compute_download_cost(&user(0), "nope", 1024);
        let free = e.compute_download_cost(&user(0), "free", 1024);
        assert_eq!(unknown.kb(), 0);
        assert_eq!(free.kb(), 0);
        assert!(unknown.is_unknown_section());
        assert!(!free.is_unknown_section());
    }

    #[test]
    fn test_fractional_multiplier_floors() {
        let e = engine();
        assert_eq!(e.compute_download_cost(&user(0), "half", 3 * 1024).kb(), 1);
        assert_eq!(e.compute_download_cost(&user(0), "half", 5 * 1024).kb(), 2);
    }

    #[test]
    fn test_fractional_multiplier_keeps_minimum_charge() {
        let e = engine();
        // 500 bytes -> 1 kb -> x0.5 floors to 0, clamped back to 1.
        assert_eq!(e.compute_download_cost(&user(0), "half", 500).kb(), 1);
        assert_eq!(e.compute_download_cost(&user(0), "half", 1024).kb(), 1);
        assert_eq!(e.compute_download_cost(&user(0), "half", 0).kb(), 0);
        // A zero factor stays free.
        assert_eq!(e.compute_download_cost(&user(0), "free", 500).kb(), 0);
    }

    #[test]
    fn test_can_download_boundary() {
        let e = engine();
        // cost = 3 * 2 = 6
        assert!(e.can_download(&user(6), "linux", 3 * 1024));
        assert!(!e.can_download(&user(5), "linux", 3 * 1024));
    }

    #[test]
    fn test_try_consume_insufficient_leaves_balance() {
        let e = engine();
        let d = e.try_consume_credits(&user(5), "linux", 3 * 1024);
        assert_eq!(d, Debit::Insufficient { balance: 5, cost: 6 });
        assert!(!d.is_approved());
        assert_eq!(d.balance(), 5);
    }

    #[test]
    fn test_try_consume_approved() {
        let e = engine();
        let d = e.try_consume_credits(&user(10), "linux", 3 * 1024);
        assert_eq!(d, Debit::Approved { balance: 4, cost: 6 });
        assert_eq!(d.balance(), 4);
    }

    #[test]
    fn test_award_credits() {
        let e = engine();
        assert_eq!(e.award_credits(&user(10), "linux", 2 * 1024), 16);
        assert_eq!(e.award_credits(&user(10), "nope", 2 * 1024), 10);
        assert_eq!(e.award_credits(&user(u64::MAX), "linux", 1024), u64::MAX);
    }

    #[test]
    fn test_reload_changes_pricing() {
        let e = engine();
        assert_eq!(e.compute_download_cost(&user(0), "linux", 1024).kb(), 2);
        e.catalog().swap(Catalog::new(
            vec![Section::new("linux", "/linux").with_download(m("5"))],
            vec![],
        ));
        assert_eq!(e.compute_download_cost(&user(0), "linux", 1024).kb(), 5);
    }
}
