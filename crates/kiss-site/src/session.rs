//! Watch-mode rebuild session.
//!
//! [`RebuildSession`] owns a [`Builder`] and the context of the last build,
//! and serializes rebuilds. Events arriving while a build is in flight are
//! queued, coalesced per path, and built by the thread already building once
//! its current build finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kiss_storage::{EventDebouncer, StorageEvent};

use crate::build::{BuildError, BuildSummary, Builder};
use crate::context::BuildContext;
use crate::planner::PlanRequest;

struct SessionState {
    builder: Builder,
    /// `None` before the first build and after a fatal error, so the next
    /// build is a full one.
    context: Option<BuildContext>,
}

/// Serializes the builds of a watch session.
pub struct RebuildSession {
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    queue: EventDebouncer,
}

impl std::fmt::Debug for RebuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildSession")
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl RebuildSession {
    #[must_use]
    pub fn new(builder: Builder) -> Self {
        Self {
            state: Mutex::new(SessionState {
                builder,
                context: None,
            }),
            in_flight: AtomicBool::new(false),
            queue: EventDebouncer::new(Duration::ZERO),
        }
    }

    /// Run a full build, replacing the session context.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] on a fatal build error; the session context
    /// is dropped.
    pub fn build_full(&self) -> Result<BuildSummary, BuildError> {
        self.run(&PlanRequest::full())
    }

    /// Queue `event` and, unless another build is in flight, build every
    /// queued event in arrival order.
    ///
    /// Returns one result per build run by this call; empty when the event
    /// was left to the build in flight.
    pub fn handle(&self, event: StorageEvent) -> Vec<Result<BuildSummary, BuildError>> {
        tracing::debug!(path = %event.path.display(), kind = ?event.kind, "Queued change");
        self.queue.record(event.path, event.kind);

        let mut results = Vec::new();
        loop {
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!(queued = self.queue.len(), "Build in flight, deferring");
                return results;
            }
            loop {
                let events = self.queue.drain_all();
                if events.is_empty() {
                    break;
                }
                for event in events {
                    results.push(self.run(&PlanRequest::change(event.path, event.kind)));
                }
            }
            self.in_flight.store(false, Ordering::Release);
            // An event recorded between the last drain and the release has
            // nobody else to build it.
            if self.queue.is_empty() {
                return results;
            }
        }
    }

    /// Number of queued events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Call `f` with the context of the last successful build.
    pub fn with_context<R>(&self, f: impl FnOnce(Option<&BuildContext>) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(state.context.as_ref())
    }

    fn run(&self, request: &PlanRequest) -> Result<BuildSummary, BuildError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = state.context.take();
        match state.builder.build(request, previous) {
            Ok(outcome) => {
                state.context = Some(outcome.context);
                Ok(outcome.summary)
            }
            Err(e) => {
                tracing::error!(file = ?request.file, error = %e, "Build failed, next build is full");
                Err(e)
            }
        }
    }
}
