//! Server configuration constants.

/// Where the operator's configuration lives unless `--config` says otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/amftpd/amftpd.rhai";

/// Configuration used when no file exists at [`DEFAULT_CONFIG_PATH`].
pub const DEFAULT_CONFIG: &str = include_str!("../assets/defaults/amftpd.rhai");

/// Log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";
