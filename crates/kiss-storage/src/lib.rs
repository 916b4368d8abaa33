//! Storage abstraction for the kiss content graph.
//!
//! This crate provides a [`Storage`] trait that separates the build pipeline
//! from the backend holding content files and receiving generated output.
//!
//! # Architecture
//!
//! The crate provides:
//! - [`Storage`] trait with `list()`, `read()`, `write()`, `copy()` and `exists()`
//! - [`FsStorage`] implementation for the local filesystem
//! - [`MockStorage`] for testing (behind `mock` feature flag)
//! - [`StorageEvent`] change notifications and the [`EventDebouncer`] that
//!   coalesces them per path
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use kiss_storage::{FsStorage, Storage};
//!
//! let storage = FsStorage::new();
//! let patterns = vec![glob::Pattern::new("**/*.md")?];
//! for file in storage.list(Path::new("content"), &patterns)? {
//!     println!("{}", file.path.display());
//! }
//! ```

mod debouncer;
mod event;
mod fs;
#[cfg(feature = "mock")]
mod mock;
mod storage;

pub use debouncer::{DebouncedEvent, EventDebouncer};
pub use event::{StorageEvent, StorageEventKind};
pub use fs::FsStorage;
#[cfg(feature = "mock")]
pub use mock::MockStorage;
pub use storage::{SourceFile, Storage, StorageError, StorageErrorKind};
