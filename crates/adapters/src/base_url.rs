use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(?:beta\d*|alpha\d*)?(?:/|$)").unwrap());

/// Normalizes an OpenAI-compatible base URL. Blank input takes `default`; a
/// trailing `#` means "use verbatim"; otherwise `/v1` is appended unless the
/// URL already names an API version.
pub fn openai_base_url(input: &str, default: &str) -> String {
    let trimmed = input.trim();
    let raw = if trimmed.is_empty() { default.trim() } else { trimmed };
    if raw.is_empty() {
        return String::new();
    }
    if let Some(verbatim) = raw.strip_suffix('#') {
        return verbatim.trim_end_matches('/').to_string();
    }

    let without_slash = raw.trim_end_matches('/');
    if VERSION_SEGMENT_RE.is_match(without_slash) {
        without_slash.to_string()
    } else {
        format!("{without_slash}/v1")
    }
}

/// Gemini's REST root. Its version segment is `v1beta`, so nothing is appended.
pub fn gemini_base_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('#').trim_end_matches('/');
    if trimmed.is_empty() {
        "https://generativelanguage.googleapis.com/v1beta".to_string()
    } else {
        trimmed.to_string()
    }
}
