//! Sandboxed file store
//!
//! All note and key material on disk goes through `SandboxedStore`, which
//! confines every operation to a single root directory. Callers pass
//! relative paths; anything empty, absolute, containing a `..` component,
//! or resolving outside the root is rejected with a validation error
//! before the filesystem is touched.

use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AppError, Result};

mod entry;
pub use entry::FileEntry;

/// Directory mode for created directories (Unix)
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
/// File mode for written files (Unix)
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// A file store rooted at a single sandbox directory
pub struct SandboxedStore {
    root: PathBuf,
}

impl SandboxedStore {
    /// Open a store rooted at `root`, creating the directory if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(AppError::Validation("store root must not be empty".into()));
        }
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| AppError::PermissionDenied(format!("cannot create root: {e}")))?;
            set_dir_mode(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a file's contents.
    pub fn read(&self, rel_path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(rel_path)?;
        if !full.is_file() {
            return Err(AppError::NotFound(rel_path.to_string()));
        }
        fs::read(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(rel_path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(rel_path.to_string())
            }
            _ => AppError::Io(e),
        })
    }

    /// Write a file, creating missing parent directories.
    pub fn write(&self, rel_path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(rel_path)?;
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| AppError::PermissionDenied(format!("{rel_path}: {e}")))?;
                set_dir_mode(parent)?;
            }
        }
        // Write to a sibling temp file and rename so readers never observe
        // a partially written note.
        let tmp = full.with_extension(match full.extension() {
            Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
            None => "tmp".to_string(),
        });
        fs::write(&tmp, data).map_err(|e| AppError::SaveFailed(format!("{rel_path}: {e}")))?;
        let committed = set_file_mode(&tmp).and_then(|()| {
            fs::rename(&tmp, &full).map_err(|e| AppError::SaveFailed(format!("{rel_path}: {e}")))
        });
        if committed.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        committed
    }

    pub fn exists(&self, rel_path: &str) -> Result<bool> {
        Ok(self.resolve(rel_path)?.exists())
    }

    /// Delete a file.
    pub fn delete(&self, rel_path: &str) -> Result<()> {
        let full = self.resolve(rel_path)?;
        if !full.exists() {
            return Err(AppError::NotFound(rel_path.to_string()));
        }
        fs::remove_file(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(rel_path.to_string())
            }
            _ => AppError::Io(e),
        })
    }

    /// Create a directory (and parents).
    pub fn mkdir(&self, rel_path: &str) -> Result<()> {
        let full = self.resolve(rel_path)?;
        fs::create_dir_all(&full)
            .map_err(|e| AppError::PermissionDenied(format!("{rel_path}: {e}")))?;
        set_dir_mode(&full)
    }

    /// List the immediate entries of a directory, sorted by name.
    pub fn list(&self, rel_path: &str) -> Result<Vec<FileEntry>> {
        let full = self.resolve(rel_path)?;
        if !full.is_dir() {
            return Err(AppError::NotFound(rel_path.to_string()));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(rel_path.to_string())
            }
            _ => AppError::Io(e),
        })? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let item_rel = join_rel(rel_path, &name);
            entries.push(FileEntry::from_metadata(name, item_rel, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Recursively walk a directory tree, invoking `visit` for every entry
    /// below the start path. Traversal stops at the first visitor error.
    pub fn walk<F>(&self, rel_path: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&FileEntry) -> Result<()>,
    {
        let full = self.resolve(rel_path)?;
        if !full.exists() {
            return Err(AppError::NotFound(rel_path.to_string()));
        }
        for entry in WalkDir::new(&full).min_depth(1) {
            let entry = entry.map_err(|e| AppError::Internal(format!("walk: {e}")))?;
            let meta = entry
                .metadata()
                .map_err(|e| AppError::Internal(format!("walk metadata: {e}")))?;
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| AppError::Internal("walk escaped root".into()))?
                .to_string_lossy()
                .into_owned();
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_entry = FileEntry::from_metadata(name, rel, &meta);
            visit(&file_entry)?;
        }
        Ok(())
    }

    /// Read a Markdown file (`.md` or `.md.enc`) as a string.
    pub fn read_markdown(&self, rel_path: &str) -> Result<String> {
        if !is_markdown_path(rel_path) {
            return Err(AppError::Validation(format!(
                "not a Markdown file: {rel_path}"
            )));
        }
        let data = self.read(rel_path)?;
        String::from_utf8(data)
            .map_err(|_| AppError::Validation(format!("{rel_path} is not valid UTF-8")))
    }

    /// Write Markdown content; the path must end in `.md` or `.md.enc`.
    pub fn write_markdown(&self, rel_path: &str, content: &str) -> Result<()> {
        if !is_markdown_path(rel_path) {
            return Err(AppError::Validation(format!(
                "Markdown files must end in .md or .md.enc: {rel_path}"
            )));
        }
        self.write(rel_path, content.as_bytes())
    }

    /// Validate a relative path and resolve it against the root.
    fn resolve(&self, rel_path: &str) -> Result<PathBuf> {
        if rel_path.is_empty() {
            return Err(AppError::Validation("path must not be empty".into()));
        }
        let path = Path::new(rel_path);
        if path.is_absolute() {
            return Err(AppError::Validation(format!(
                "absolute paths are not allowed: {rel_path}"
            )));
        }
        // Lexical normalization; any `..` component is rejected outright,
        // so the join can never escape the root.
        let mut clean = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(AppError::Validation(format!(
                        "path must not contain '..': {rel_path}"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AppError::Validation(format!(
                        "absolute paths are not allowed: {rel_path}"
                    )));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(AppError::Validation(format!("invalid path: {rel_path}")));
        }
        let full = self.root.join(&clean);
        if !full.starts_with(&self.root) {
            return Err(AppError::Validation(format!(
                "path escapes the store root: {rel_path}"
            )));
        }
        Ok(full)
    }
}

/// Whether a path names a Markdown file. Exactly `.md` and `.md.enc`
/// count; `.markdown` and case variants do not.
pub fn is_markdown_path(path: &str) -> bool {
    path.ends_with(".md") || path.ends_with(".md.enc")
}

fn join_rel(base: &str, name: &str) -> String {
    if base == "." || base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(unix)]
fn set_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE)).map_err(AppError::Io)
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE)).map_err(AppError::Io)
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}
