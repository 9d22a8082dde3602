//! Directory entry metadata

use std::fs::Metadata;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a file or directory inside the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the store root
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// True for `.enc` files (encrypted envelopes)
    pub is_encrypted: bool,
}

impl FileEntry {
    pub fn from_metadata(name: String, path: String, meta: &Metadata) -> Self {
        let is_encrypted = !meta.is_dir() && name.ends_with(".enc");
        Self {
            is_directory: meta.is_dir(),
            size: meta.len(),
            modified_at: meta.modified().ok().map(DateTime::from),
            is_encrypted,
            name,
            path,
        }
    }

    /// Whether the entry is a Markdown note. Encrypted envelopes count
    /// once the `.enc` suffix is stripped: `a.md.enc` is Markdown.
    pub fn is_markdown(&self) -> bool {
        if self.is_directory {
            return false;
        }
        let name = if self.is_encrypted {
            self.name.strip_suffix(".enc").unwrap_or(&self.name)
        } else {
            &self.name
        };
        name.ends_with(".md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: name.to_string(),
            is_directory: is_dir,
            size: 0,
            modified_at: None,
            is_encrypted: !is_dir && name.ends_with(".enc"),
        }
    }

    #[test]
    fn test_markdown_detection() {
        assert!(entry("a.md", false).is_markdown());
        assert!(entry("a.md.enc", false).is_markdown());
        assert!(!entry("a.txt.enc", false).is_markdown());
        assert!(!entry("a.markdown", false).is_markdown());
        assert!(!entry("a.md", true).is_markdown());
    }

    #[test]
    fn test_encrypted_flag() {
        assert!(entry("a.md.enc", false).is_encrypted);
        assert!(!entry("a.md", false).is_encrypted);
    }
}
