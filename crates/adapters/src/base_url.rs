use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+$").unwrap());

/// Default endpoint for each supported `LLM_INTERFACE`.
pub fn default_base_url(interface: &str) -> Option<&'static str> {
    match interface.trim().to_lowercase().as_str() {
        "openai" => Some("https://api.openai.com/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "grok" => Some("https://api.x.ai/v1"),
        _ => None,
    }
}

/// Normalises a base URL so it ends in a `/vN` segment. A trailing `#` opts
/// out: the URL is used as given, minus the marker.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.ends_with('#') {
        return trimmed.trim_end_matches('#').to_string();
    }

    let without_slash = trimmed.trim_end_matches('/');
    if VERSION_SUFFIX_RE.is_match(without_slash) || without_slash.contains("/v1/") {
        without_slash.to_string()
    } else {
        format!("{}/v1", without_slash)
    }
}

/// The configured URL when set, otherwise the interface's default.
pub fn resolve_base_url(configured: &str, interface: &str) -> Option<String> {
    if configured.trim().is_empty() {
        default_base_url(interface).map(check_base_url)
    } else {
        Some(check_base_url(configured))
    }
}
