//! Error text normalization and hashing.
//!
//! `normalize` is what patterns are evaluated against and what the cache key
//! is derived from, so two texts that normalize equally always classify equally.
//! Line breaks survive normalization so a pattern never matches across lines.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"\n]*"|'[^'\n]*'"#).expect("quoted string regex"));

static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[a-z]:)?(?:[\w.-]*[/\\])+[\w.-]+").expect("path regex"));

/// Lower-case, mask numeric literals as `#`, collapse whitespace within each
/// line and drop blank lines.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let masked = NUMBER.replace_all(&lowered, "#");
    masked
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 hex of the normalized text; the classification cache key.
pub fn normalized_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Recurrence signature: like `normalize` but also masks quoted strings and
/// paths so the same failure in different files groups together.
pub fn signature(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_strings = QUOTED.replace_all(&lowered, "<str>");
    let no_paths = PATH.replace_all(&no_strings, "<path>");
    let masked = NUMBER.replace_all(&no_paths, "#");
    let collapsed = masked.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(collapsed.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_masks_numbers_and_whitespace() {
        assert_eq!(
            normalize("  SyntaxError:   invalid syntax (line 42)\n"),
            "syntaxerror: invalid syntax (line #)"
        );
        assert_eq!(normalize("took 1.25s"), "took #s");
    }

    #[test]
    fn test_hash_ignores_number_and_case_differences() {
        assert_eq!(
            normalized_hash("Timeout after 30 seconds"),
            normalized_hash("timeout   after 45 seconds")
        );
        assert_ne!(normalized_hash("timeout"), normalized_hash("connection refused"));
        assert_eq!(normalized_hash("x").len(), 64);
    }

    #[test]
    fn test_signature_masks_paths_and_strings() {
        let a = signature("ModuleNotFoundError: No module named 'requests' in src/app/main.py");
        let b = signature("ModuleNotFoundError: No module named 'numpy' in lib/util.py");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, signature("Permission denied"));
    }

    #[test]
    fn test_normalize_keeps_line_breaks() {
        assert_eq!(
            normalize("Traceback:\n\n   File  \"a.py\", line 3\r\nBoom"),
            "traceback:\nfile \"a.py\", line #\nboom"
        );
        assert_ne!(normalized_hash("loading config\nboom"), normalized_hash("loading config boom"));
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t"), "");
    }
}
