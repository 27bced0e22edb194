use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_TITLE_CHARS: usize = 100;
const FALLBACK_TITLE: &str = "bilibili_media";

pub fn sanitize_title(title: &str) -> String {
    let name: String = title
        .nfc()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let name = WS_RE.replace_all(&name, " ");
    let name = name.trim_matches(|c: char| c.is_whitespace() || c == '.');

    let truncated: String = name.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim_end_matches(|c: char| c.is_whitespace() || c == '.');

    if truncated.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        truncated.to_string()
    }
}
