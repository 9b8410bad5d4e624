//! Shared utility functions for the Shipyard crate.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};

use chrono::{SecondsFormat, Utc};
use regex::Regex;

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lowercase, dash-separated slug of at most `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..slug.floor_char_boundary(max_len)]
            .trim_end_matches('-')
            .to_string()
    } else {
        slug
    }
}

static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

/// Remove terminal color and cursor escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_REGEX.replace_all(text, "").into_owned()
}

/// Keep the last `max_chars` characters. CI failures are usually reported at
/// the end of a log.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("[... {} characters truncated ...]\n{}", skip, tail)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
/// Readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// First eight characters of an identifier, for display.
pub fn short_id(id: &str) -> &str {
    &id[..id.floor_char_boundary(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add OAuth login!", 40), "add-oauth-login");
        assert_eq!(slugify("  --weird__spacing--  ", 40), "weird-spacing");
        assert_eq!(slugify("a very long feature title", 10), "a-very-lon");
        assert_eq!(slugify("abcde fgh", 6), "abcde");
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31merror\x1b[0m: boom"), "error: boom");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        let out = truncate_tail("0123456789", 4);
        assert!(out.ends_with("6789"));
        assert!(out.contains("6 characters truncated"));
        assert_eq!(truncate_tail("short", 10), "short");
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("1234567890abcdef"), "12345678");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_now_is_rfc3339() {
        let ts = now_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
