//! Validator Module
//!
//! Safety checks applied before any filesystem mutation: path containment,
//! filesystem-safe name rewriting, and content-hash identifier validation.
//! Every mutating operation in the engine, selector, and queue calls into
//! this module first; a validation failure aborts the operation with no
//! side effects.

use crate::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier lengths accepted for item content hashes (hex characters).
/// Two hash widths are in circulation: 40-char (SHA-1 era) and 64-char.
const IDENTIFIER_LENGTHS: [usize; 2] = [40, 64];

/// A validated item identifier (fixed-length hexadecimal content hash).
///
/// Construction goes through [`ItemId::new`], which enforces the hash
/// format; the inner string is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Validate a raw string as an item identifier.
    ///
    /// Accepts 40- or 64-character hexadecimal strings (case preserved).
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !IDENTIFIER_LENGTHS.contains(&raw.len()) {
            return Err(ManagerError::InvalidIdentifier(format!(
                "identifier must be {} or {} characters, got {}",
                IDENTIFIER_LENGTHS[0],
                IDENTIFIER_LENGTHS[1],
                raw.len()
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ManagerError::InvalidIdentifier(
                "identifier contains non-hexadecimal characters".to_string(),
            ));
        }
        Ok(ItemId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve a candidate path and require it to be a descendant of one of the
/// allowed roots.
///
/// Symlinks and `..` segments are resolved via canonicalization, so a path
/// that escapes its root through a link is rejected the same as a literal
/// traversal. Returns the resolved absolute path on success.
pub fn validate_path(candidate: &Path, allowed_roots: &[PathBuf]) -> Result<PathBuf> {
    let resolved = candidate.canonicalize().map_err(|e| {
        ManagerError::PathTraversal(format!(
            "cannot resolve path: path={:?}, error={}",
            candidate, e
        ))
    })?;

    for root in allowed_roots {
        let resolved_root = match root.canonicalize() {
            Ok(r) => r,
            Err(_) => continue,
        };
        if resolved.starts_with(&resolved_root) {
            return Ok(resolved);
        }
    }

    Err(ManagerError::PathTraversal(format!(
        "path escapes allowed roots: path={:?}, roots={:?}",
        resolved, allowed_roots
    )))
}

/// Rewrite a raw display name into a filesystem-safe entry name.
///
/// Deterministic: path separators become underscores, control characters
/// are dropped, leading dots are stripped so entries cannot hide
/// themselves, and surrounding whitespace is trimmed. An input that
/// sanitizes to nothing yields `"unnamed"`.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '\0',
            c => c,
        })
        .filter(|c| *c != '\0')
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim().to_string();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_accepts_40_char_hex() {
        let id = ItemId::new("02E5A8D9F7800A063237F0D37467144360D4B70A").unwrap();
        assert_eq!(id.as_str().len(), 40);
    }

    #[test]
    fn test_item_id_accepts_64_char_hex() {
        let raw = "a1b2".repeat(16);
        let id = ItemId::new(&raw).unwrap();
        assert_eq!(id.as_str(), raw);
    }

    #[test]
    fn test_item_id_rejects_wrong_length() {
        assert!(ItemId::new("abc123").is_err());
        assert!(ItemId::new(&"a".repeat(41)).is_err());
    }

    #[test]
    fn test_item_id_rejects_non_hex() {
        let raw = "g".repeat(40);
        assert!(ItemId::new(&raw).is_err());
    }

    #[test]
    fn test_item_id_trims_whitespace() {
        let raw = format!("  {}  ", "f".repeat(40));
        assert!(ItemId::new(&raw).is_ok());
    }

    #[test]
    fn test_sanitize_name_strips_separators() {
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_name_strips_leading_dots() {
        assert_eq!(sanitize_name("..hidden"), "hidden");
        assert_eq!(sanitize_name(".config"), "config");
    }

    #[test]
    fn test_sanitize_name_drops_control_chars() {
        assert_eq!(sanitize_name("a\x00b\x1fc"), "abc");
    }

    #[test]
    fn test_sanitize_name_deterministic() {
        let raw = " some show s01e02 ";
        assert_eq!(sanitize_name(raw), sanitize_name(raw));
        assert_eq!(sanitize_name(raw), "some show s01e02");
    }

    #[test]
    fn test_sanitize_name_empty_fallback() {
        assert_eq!(sanitize_name("..."), "unnamed");
        assert_eq!(sanitize_name("   "), "unnamed");
    }

    #[test]
    fn test_validate_path_accepts_descendant() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("data");
        std::fs::create_dir(&child).unwrap();

        let resolved = validate_path(&child, &[dir.path().to_path_buf()]).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_validate_path_rejects_escape() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();

        let err = validate_path(outside.path(), &[root.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, ManagerError::PathTraversal(_)));
    }

    #[test]
    fn test_validate_path_rejects_dotdot_escape() {
        let root = tempfile::tempdir().unwrap();
        let child = root.path().join("inner");
        std::fs::create_dir(&child).unwrap();

        let sneaky = child.join("..").join("..");
        let result = validate_path(&sneaky, &[child.clone()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_path_rejects_symlink_escape() {
        #[cfg(unix)]
        {
            let root = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            let link = root.path().join("link");
            std::os::unix::fs::symlink(outside.path(), &link).unwrap();

            let result = validate_path(&link, &[root.path().to_path_buf()]);
            assert!(result.is_err());
        }
    }
}
