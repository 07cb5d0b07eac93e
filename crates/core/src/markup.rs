//! Plain-text normalisation of free-form model replies.

use regex::Regex;
use std::sync::LazyLock;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("heading pattern is valid"));

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+").expect("list marker pattern is valid")
});

static BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").expect("bold pattern is valid")
});

static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("italic pattern is valid"));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

/// Strips Markdown emphasis, code ticks and heading markers, and turns every
/// list marker into a uniform `• ` bullet.
pub fn normalize_plain_text(text: &str) -> String {
    let text = HEADING.replace_all(text, "");
    let text = LIST_MARKER.replace_all(&text, "• ");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = ITALIC.replace_all(&text, "$1");
    let text = text.replace('`', "");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}
