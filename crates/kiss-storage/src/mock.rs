//! Mock storage implementation for testing.
//!
//! Provides [`MockStorage`] for unit testing without filesystem access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use glob::Pattern;

use crate::storage::{SourceFile, Storage, StorageError};

const BACKEND: &str = "Mock";

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

/// Mock storage for testing.
///
/// Stores input files and written output in memory. Use the builder methods
/// to configure the mock with test data.
///
/// # Example
///
/// ```ignore
/// use kiss_storage::{MockStorage, Storage};
///
/// let storage = MockStorage::new()
///     .with_file("content/index.md", "# Home");
///
/// let content = storage.read(Path::new("content/index.md")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct MockStorage {
    files: RwLock<BTreeMap<PathBuf, MockFile>>,
    written: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MockStorage {
    /// Create a new empty mock storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file with content. Both timestamps default to the Unix epoch.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert_file(path, content);
        self
    }

    /// Add a file with explicit creation and modification times.
    #[must_use]
    pub fn with_file_times(
        self,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                path.into(),
                MockFile {
                    content: content.into().into_bytes(),
                    created,
                    modified,
                },
            );
        self
    }

    /// Add or replace a file after construction (e.g. between two builds).
    pub fn insert_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let path = path.into();
        let (created, modified) = files
            .get(&path)
            .map_or((DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH), |f| {
                (f.created, f.modified)
            });
        files.insert(
            path,
            MockFile {
                content: content.into().into_bytes(),
                created,
                modified,
            },
        );
    }

    /// Content written to `path`, if any.
    #[must_use]
    pub fn written(&self, path: impl AsRef<Path>) -> Option<String> {
        self.written
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// All written paths in sorted order.
    #[must_use]
    pub fn written_paths(&self) -> Vec<PathBuf> {
        self.written
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Forget all written output.
    pub fn clear_written(&self) {
        self.written
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn content_of(&self, path: &Path) -> Option<Vec<u8>> {
        if let Some(file) = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Some(file.content.clone());
        }
        self.written
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

impl Storage for MockStorage {
    fn list(&self, root: &Path, patterns: &[Pattern]) -> Result<Vec<SourceFile>, StorageError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(root)
                    .is_ok_and(|rel| patterns.iter().any(|p| p.matches_path(rel)))
            })
            .map(|(path, file)| SourceFile {
                path: path.clone(),
                created: file.created,
                modified: file.modified,
            })
            .collect())
    }

    fn read(&self, path: &Path) -> Result<String, StorageError> {
        self.content_of(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .ok_or_else(|| StorageError::not_found(path).with_backend(BACKEND))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        self.written
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        if let Some(content) = self.content_of(from) {
            return self.write(to, &content);
        }
        // Directory copy: every file under `from`
        let nested: Vec<(PathBuf, Vec<u8>)> = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(path, file)| {
                let rel = path.strip_prefix(from).ok()?;
                Some((to.join(rel), file.content.clone()))
            })
            .collect();
        if nested.is_empty() {
            return Err(StorageError::not_found(from).with_backend(BACKEND));
        }
        for (target, content) in nested {
            self.write(&target, &content)?;
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }
}
