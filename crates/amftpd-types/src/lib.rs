//! Shared accounting types for amftpd.
//!
//! This crate is the data foundation of the daemon: typed user IDs, the
//! fixed-point credit multiplier, and the immutable section/group/user
//! records that the path resolver and the ratio engine operate on. It has
//! **no internal amftpd dependencies**.
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------------|
//! | Type               | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | [`Section`]        | Path-rooted zone with upload/download multipliers |
//! | [`Group`]          | Per-section multiplier overrides                  |
//! | [`User`]           | Credit balance, no-ratio flag, group membership   |
//! | [`UserId`]         | Which user record                                 |
//! | [`Multiplier`]     | Non-negative fixed-point factor (thousandths)     |
//! | [`AccessDecision`] | Derived list/upload/download gate for a request   |
//! |--------------------|---------------------------------------------------|
//!
//! Credits are integer kilobytes everywhere. Nothing in this crate uses
//! floating point arithmetic.

pub mod ids;
pub mod multiplier;
pub mod section;
pub mod user;

pub use ids::UserId;
pub use multiplier::{Multiplier, MultiplierError};
pub use section::{AccessDecision, Group, Section};
pub use user::User;

/// Bytes per accounting kilobyte.
pub const BYTES_PER_KB: u64 = 1024;

/// Convert a transfer size to accounting kilobytes.
///
/// Floors the division, but any non-empty transfer counts as at least one
/// kilobyte so that small files are never free.
pub fn size_to_kb(size_bytes: u64) -> u64 {
    if size_bytes == 0 {
        0
    } else {
        (size_bytes / BYTES_PER_KB).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_to_kb_floors() {
        assert_eq!(size_to_kb(1024), 1);
        assert_eq!(size_to_kb(2047), 1);
        assert_eq!(size_to_kb(2048), 2);
        assert_eq!(size_to_kb(10 * 1024 * 1024), 10 * 1024);
    }

    #[test]
    fn test_size_to_kb_minimum_charge() {
        assert_eq!(size_to_kb(1), 1);
        assert_eq!(size_to_kb(500), 1);
        assert_eq!(size_to_kb(1023), 1);
    }

    #[test]
    fn test_size_to_kb_empty() {
        assert_eq!(size_to_kb(0), 0);
    }
}
