//! Credential pattern validation and display masking.

use std::sync::LazyLock;

use regex::Regex;

/// `sk-` followed by exactly 48 characters from `[A-Za-z0-9_-]`.
static CREDENTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sk-[A-Za-z0-9_-]{48}$").expect("credential pattern is a valid regex")
});

/// Check a credential against the accepted pattern.
pub fn is_valid_credential(value: &str) -> bool {
    CREDENTIAL_PATTERN.is_match(value)
}

/// Render a credential for display: prefix and the last four characters only.
///
/// Empty credentials render as `None` so callers can print their own sentinel.
pub fn mask_credential(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return Some("*".repeat(chars.len()));
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    let head: String = chars[..3].iter().collect();
    Some(format!("{head}…{tail}"))
}
