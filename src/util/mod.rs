//! Shared helpers:
//!
//! - **URL validation**: SSRF-safe checks for server-supplied URLs
//! - **Text sanitizing**: control-character stripping for feed text
//! - **Files**: atomic write-temp-then-rename

mod fs;
mod text;
mod url_validator;

pub use fs::atomic_write;
pub use text::{clean_field, strip_control_chars};
pub use url_validator::{same_origin, validate_base_url, validate_url, UrlValidationError};
