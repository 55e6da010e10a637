//! Shared helpers: content fingerprints and JSON extraction.

pub mod fingerprint;
pub mod json_extraction;

pub use fingerprint::{cache_key, normalize_url, prefix, ContentHash};
pub use json_extraction::extract_json_object;
