//! Filesystem storage implementation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use glob::Pattern;

use crate::storage::{SourceFile, Storage, StorageError};

/// Backend identifier for error messages.
const BACKEND: &str = "Fs";

/// Filesystem storage implementation.
///
/// Walks directories recursively, skipping hidden entries (names starting
/// with `.`), and matches root-relative paths against glob patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl FsStorage {
    /// Create a new filesystem storage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn walk(
        dir: &Path,
        root: &Path,
        patterns: &[Pattern],
        out: &mut Vec<SourceFile>,
    ) -> Result<(), StorageError> {
        let entries = fs::read_dir(dir).map_err(|e| Self::error(e, dir))?;
        for entry in entries {
            let entry = entry.map_err(|e| Self::error(e, dir))?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| Self::error(e, &path))?;
            if metadata.is_dir() {
                Self::walk(&path, root, patterns, out)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if !patterns.iter().any(|p| p.matches_path(relative)) {
                continue;
            }
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            let created = metadata
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(modified);
            out.push(SourceFile {
                path,
                created,
                modified,
            });
        }
        Ok(())
    }

    fn copy_tree(from: &Path, to: &Path) -> Result<(), StorageError> {
        if from.is_dir() {
            fs::create_dir_all(to).map_err(|e| Self::error(e, to))?;
            for entry in fs::read_dir(from).map_err(|e| Self::error(e, from))? {
                let entry = entry.map_err(|e| Self::error(e, from))?;
                Self::copy_tree(&entry.path(), &to.join(entry.file_name()))?;
            }
            return Ok(());
        }
        Self::ensure_parent(to)?;
        fs::copy(from, to).map_err(|e| Self::error(e, from))?;
        Ok(())
    }

    fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Self::error(e, parent))?;
        }
        Ok(())
    }

    fn error(err: std::io::Error, path: &Path) -> StorageError {
        StorageError::io(err, Some(path.to_path_buf())).with_backend(BACKEND)
    }
}

impl Storage for FsStorage {
    fn list(&self, root: &Path, patterns: &[Pattern]) -> Result<Vec<SourceFile>, StorageError> {
        let mut files = Vec::new();
        Self::walk(root, root, patterns, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<String, StorageError> {
        fs::read_to_string(path).map_err(|e| Self::error(e, path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        Self::ensure_parent(path)?;
        fs::write(path, contents).map_err(|e| Self::error(e, path))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        if !from.exists() {
            return Err(StorageError::not_found(PathBuf::from(from)).with_backend(BACKEND));
        }
        Self::copy_tree(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
