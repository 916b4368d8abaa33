//! Storage event types for change notification.
//!
//! Events are produced by whatever watches the content tree (the embedding
//! binary) and consumed by the rebuild planner.

use std::path::PathBuf;

/// Kind of storage event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageEventKind {
    /// File was created.
    Created,
    /// File was modified.
    Modified,
    /// File was removed.
    Removed,
    /// Directory was created.
    DirCreated,
    /// Directory was removed.
    DirRemoved,
}

impl StorageEventKind {
    /// Whether the event concerns a directory rather than a file.
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(self, Self::DirCreated | Self::DirRemoved)
    }
}

/// A storage change event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    /// Path of the changed file, as seen by the watcher.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: StorageEventKind,
}

impl StorageEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: StorageEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
