use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use time::format_description::well_known::Rfc3339;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI regex")
});

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").into_owned()
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One line of installer output as it should appear in a progress message.
pub fn display_line(raw: &str, max: usize) -> Option<String> {
    let clean = strip_ansi(raw);
    let clean = clean.trim();
    if clean.is_empty() {
        return None;
    }
    Some(truncate_chars(clean, max).to_string())
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[1;32mInstalled\x1b[0m uv"), "Installed uv");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("██████", 2), "██");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn blank_lines_have_no_display_form() {
        assert_eq!(display_line("  \x1b[0m  ", 80), None);
        assert_eq!(display_line(" downloading cpython ", 11).as_deref(), Some("downloading"));
    }
}
