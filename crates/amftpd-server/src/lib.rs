//! amftpd server library
//!
//! Startup wiring for the accounting engine. The binary in `main.rs` is a
//! thin operator CLI over [`bootstrap::Accounting`].

pub mod bootstrap;
pub mod constants;

pub use bootstrap::{Accounting, BootstrapError, ConfigSource};
