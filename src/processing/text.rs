use std::sync::LazyLock;

use regex::Regex;

static SPACE_VARIANTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Cc}\u{00A0}\u{1680}\u{2000}-\u{200B}\u{202F}\u{205F}\u{3000}]")
        .expect("space variants pattern is valid")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Cleans a listing description before it is embedded.
///
/// Newlines, control characters and Unicode space variants become plain
/// spaces, runs of whitespace collapse to one space and the ends are trimmed.
pub fn normalize_text(text: &str) -> String {
    let text = SPACE_VARIANTS.replace_all(text, " ");
    WHITESPACE_RUN.replace_all(&text, " ").trim().to_string()
}
