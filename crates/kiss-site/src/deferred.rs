//! Deferred attribute computations and their dependency declarations.

use std::fmt;
use std::sync::Arc;

use crate::compute::{ComputeContext, ComputeError};
use crate::page::Page;
use crate::value::Value;

/// Signature of a deferred computation.
pub type ComputeFn =
    dyn Fn(&Page, &ComputeContext<'_>) -> Result<Value, ComputeError> + Send + Sync;

/// A dependency a deferred computation waits for.
///
/// Paths are dot-separated and address page attributes (`permalink`,
/// `author.name`) or metadata (`meta.descendants`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dependency {
    /// An attribute of the page being computed.
    Path(String),
    /// Attributes of other pages: `via` holds one page id (string) or a
    /// list of ids (array), and `then` is checked on each referenced page.
    Chained {
        /// Path on the current page holding the referenced id(s).
        via: String,
        /// Dependencies checked on each referenced page.
        then: Vec<Dependency>,
    },
}

impl Dependency {
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    #[must_use]
    pub fn chained(via: impl Into<String>, then: impl IntoIterator<Item = Dependency>) -> Self {
        Self::Chained {
            via: via.into(),
            then: then.into_iter().collect(),
        }
    }
}

/// A computation producing an attribute value once its dependencies resolve.
///
/// Cloning is cheap: the closure and dependency list are shared. Two deferred
/// values are equal when they share the same closure.
#[derive(Clone)]
pub struct Deferred {
    name: Arc<str>,
    dependencies: Arc<[Dependency]>,
    compute: Arc<ComputeFn>,
}

impl Deferred {
    /// Create a deferred computation.
    pub fn new<F>(
        name: impl Into<Arc<str>>,
        dependencies: impl IntoIterator<Item = Dependency>,
        compute: F,
    ) -> Self
    where
        F: Fn(&Page, &ComputeContext<'_>) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().collect(),
            compute: Arc::new(compute),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Run the computation.
    ///
    /// # Errors
    ///
    /// Returns whatever the computation reports.
    pub fn evaluate(&self, page: &Page, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
        (self.compute)(page, ctx)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.compute, &other.compute)
    }
}
