//! Virtual path → section resolution.
//!
//! - [`SectionResolver`] - longest-root matching over the configured sections
//!
//! ## Matching rules
//!
//! - **Case-insensitive**: roots keep their configured case for display but
//!   compare without it.
//! - **Separator-normalized**: `\` is treated as `/`, a leading `/` is
//!   implied, trailing separators on roots are ignored.
//! - **Plain prefix**: a root matches any path that starts with it, so
//!   `/linux` also governs `/linuxfoo`.
//! - **Longest root wins**: sections are kept sorted by descending root
//!   length, so the first match is the most specific.
//! - **No implicit catch-all**: operators who want one configure a section
//!   rooted at `/`.

mod resolver;

pub use resolver::SectionResolver;
