//! Markdown stripping for spoken replies
//!
//! Generated replies frequently carry markdown. A speech engine reads the
//! markers out loud, so they are removed before synthesis.

use std::sync::LazyLock;

use regex::Regex;

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));

static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("valid regex"));

static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+ ").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid regex"));

static QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+").expect("valid regex"));

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"- ").expect("valid regex"));

/// Remove bold, italic, code, heading, link, quote and bullet markup
///
/// Rules are applied in order, so `**x**` is unwrapped before the italic
/// rule sees it. Plain text passes through unchanged apart from trimming.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let steps: [(&LazyLock<Regex>, &str); 7] = [
        (&BOLD, "${1}"),
        (&ITALIC, "${1}"),
        (&CODE, "${1}"),
        (&HEADING, ""),
        (&LINK, "${1}"),
        (&QUOTE, ""),
        (&BULLET, ""),
    ];

    let mut out = text.to_string();
    for (pattern, replacement) in steps {
        out = pattern.replace_all(&out, replacement).into_owned();
    }

    out.trim().to_string()
}
