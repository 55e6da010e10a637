//! Content fingerprints and URL normalization.
//!
//! Cache keys are derived from request content (a stage tag plus a bounded
//! prefix of the prompt), never from item identity, so identical requests
//! made for different items share one cached result. Source links are
//! canonicalized before they are used as the dedup key.

use sha2::{Digest, Sha256};

/// Query parameters that only carry tracking information.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid"];

/// SHA-256 fingerprint of request content, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash arbitrary content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First `max_chars` characters of `text`, respecting char boundaries.
pub fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build a cache key from a stage tag and request parts.
///
/// # Arguments
///
/// * `tag` - Namespace for the key, e.g. `"image"` or `"audio"`
/// * `parts` - Request content; callers pass already-truncated prefixes
///
/// # Example
///
/// ```
/// use newsreel::utils::fingerprint::{cache_key, prefix};
///
/// let prompt = "A crowded market street at dusk";
/// let a = cache_key("image", &[prefix(prompt, 400)]);
/// let b = cache_key("image", &[prompt]);
/// assert_eq!(a, b);
/// assert_ne!(a, cache_key("audio", &[prompt]));
/// ```
pub fn cache_key(tag: &str, parts: &[&str]) -> ContentHash {
    let mut content = String::from(tag);
    for part in parts {
        // length-prefixed so ("ab", "c") and ("a", "bc") differ
        content.push('\u{1f}');
        content.push_str(&part.len().to_string());
        content.push(':');
        content.push_str(part);
    }
    ContentHash::from_content(&content)
}

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Canonicalize a source link for deduplication.
///
/// Lowercases scheme and host (the URL parser does this), drops the
/// fragment and tracking query parameters, and strips a trailing slash from
/// the path.
///
/// # Errors
///
/// Returns the parse error text when `raw` is not an absolute URL.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let mut url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("{}: {}", raw, e))?;
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

/// Host part of a link, used as the item's source label.
pub fn source_host(link: &str) -> Option<String> {
    reqwest::Url::parse(link)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}
