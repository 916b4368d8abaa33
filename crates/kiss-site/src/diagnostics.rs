//! Per-build error and warning counters.
//!
//! Failures isolated to one page or one unit of work are logged through
//! `tracing` and counted here; the caller decides whether a non-zero error
//! count fails the process.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Error and warning counters for one build.
///
/// Shared by reference across phases, including parallel ones.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: AtomicUsize,
    warnings: AtomicUsize,
}

/// Snapshot of [`Diagnostics`] counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticCounts {
    pub errors: usize,
    pub warnings: usize,
}

impl DiagnosticCounts {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `n` errors at once.
    pub fn errors(&self, n: usize) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters.
    #[must_use]
    pub fn counts(&self) -> DiagnosticCounts {
        DiagnosticCounts {
            errors: self.errors.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
        }
    }

    /// Take the counters, resetting them to zero.
    pub fn drain(&self) -> DiagnosticCounts {
        DiagnosticCounts {
            errors: self.errors.swap(0, Ordering::Relaxed),
            warnings: self.warnings.swap(0, Ordering::Relaxed),
        }
    }
}
