//! JSON extraction from LLM responses.
//!
//! Generation services often wrap the requested JSON in markdown fences or
//! surround it with prose. The helpers here try, in order:
//! 1. the whole response when it already parses as JSON
//! 2. a fenced ```json block, then any fenced block
//! 3. the first balanced `{...}` object in the text
//!
//! # Example
//!
//! ```
//! use newsreel::utils::json_extraction::extract_json_object;
//!
//! let response = "Sure! ```json\n{\"title\": \"x\"}\n``` hope this helps";
//! assert_eq!(extract_json_object(response).as_deref(), Some("{\"title\": \"x\"}"));
//! ```

use std::sync::OnceLock;

use regex::Regex;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?P<lang>[A-Za-z]*)\s*\n?(?P<body>.*?)```")
            .expect("fence pattern is valid")
    })
}

/// Extract the first JSON object from a mixed-content response.
///
/// Returns `None` when no balanced object that parses as JSON is found.
pub fn extract_json_object(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    let fences: Vec<(String, String)> = fence_regex()
        .captures_iter(content)
        .map(|caps| {
            (
                caps.name("lang")
                    .map(|m| m.as_str().to_lowercase())
                    .unwrap_or_default(),
                caps.name("body")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
            )
        })
        .collect();
    let json_fences = fences.iter().filter(|(lang, _)| lang == "json");
    let other_fences = fences.iter().filter(|(lang, _)| lang != "json");
    for (_, body) in json_fences.chain(other_fences) {
        if let Some(json) = first_balanced_object(body) {
            return Some(json);
        }
    }

    first_balanced_object(content)
}

/// Scan for `{` positions and return the first balanced object that parses.
fn first_balanced_object(text: &str) -> Option<String> {
    for (start, _) in text.match_indices('{') {
        let candidate = &text[start..];
        if let Some(end) = find_matching_brace(candidate) {
            let json = &candidate[..=end];
            if serde_json::from_str::<serde_json::Value>(json).is_ok() {
                return Some(json.to_string());
            }
        }
    }
    None
}

/// Byte index of the brace closing the `{` at position 0, ignoring braces
/// inside string literals.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
