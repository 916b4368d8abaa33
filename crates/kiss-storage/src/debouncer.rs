//! Event debouncing for storage change notification.
//!
//! Coalesces multiple storage events into single events per path,
//! reducing unnecessary rebuilds when editors emit multiple events per save
//! or when changes arrive while a build is still running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::event::{StorageEvent, StorageEventKind};

/// A coalesced event ready for processing.
pub type DebouncedEvent = StorageEvent;

/// Pending event waiting to be emitted.
struct PendingEvent {
    kind: StorageEventKind,
    deadline: Instant,
    /// Arrival order of the first event for this path.
    seq: u64,
}

#[derive(Default)]
struct PendingState {
    events: HashMap<PathBuf, PendingEvent>,
    next_seq: u64,
}

/// Thread-safe event debouncer.
///
/// Coalesces raw storage events into single events per path. Drained events
/// come out in the order their path was first recorded.
pub struct EventDebouncer {
    pending: Mutex<PendingState>,
    debounce_duration: Duration,
}

impl EventDebouncer {
    /// Create a new debouncer with the specified debounce duration.
    ///
    /// A zero duration turns the debouncer into a coalescing queue.
    #[must_use]
    pub fn new(debounce_duration: Duration) -> Self {
        Self {
            pending: Mutex::new(PendingState::default()),
            debounce_duration,
        }
    }

    /// Record an event.
    ///
    /// Thread-safe, can be called from watcher callbacks.
    pub fn record(&self, path: PathBuf, kind: StorageEventKind) {
        use std::collections::hash_map::Entry;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + self.debounce_duration;
        let seq = pending.next_seq;
        pending.next_seq += 1;

        match pending.events.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(PendingEvent {
                    kind,
                    deadline,
                    seq,
                });
            }
            Entry::Occupied(mut entry) => {
                let existing_kind = entry.get().kind;
                if let Some(coalesced_kind) = Self::coalesce(existing_kind, kind) {
                    entry.get_mut().kind = coalesced_kind;
                    entry.get_mut().deadline = deadline;
                } else {
                    // Created + Removed: the path never existed for us
                    entry.remove();
                }
            }
        }
    }

    /// Coalesce two event kinds.
    ///
    /// Returns `None` if both events should be discarded.
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: StorageEventKind, new: StorageEventKind) -> Option<StorageEventKind> {
        use StorageEventKind::{Created, DirCreated, DirRemoved, Modified, Removed};

        match (existing, new) {
            // Created + anything
            (Created, Created) => Some(Created),  // Duplicate
            (Created, Modified) => Some(Created), // Content included in create
            (Created, Removed) => None,           // File never existed for us

            // Modified + anything
            (Modified, Created) => Some(Created), // File was recreated
            (Modified, Modified) => Some(Modified), // Normal debounce
            (Modified, Removed) => Some(Removed), // File is gone

            // Removed + anything
            (Removed, Created) => Some(Modified), // File was replaced
            (Removed, Modified) => Some(Removed), // Invalid state, ignore new
            (Removed, Removed) => Some(Removed),  // Duplicate

            // Directories
            (DirCreated, DirRemoved) => None,
            (DirRemoved, DirCreated) => Some(DirRemoved), // Contents may differ
            (_, new) => Some(new),
        }
    }

    /// Drain events that have passed their debounce deadline.
    pub fn drain_ready(&self) -> Vec<DebouncedEvent> {
        self.drain_where(Instant::now())
    }

    /// Drain every pending event regardless of its deadline.
    pub fn drain_all(&self) -> Vec<DebouncedEvent> {
        self.drain_where(Instant::now() + self.debounce_duration)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    /// Whether no event is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain_where(&self, now: Instant) -> Vec<DebouncedEvent> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let ready_paths: Vec<PathBuf> = pending
            .events
            .iter()
            .filter(|(_, event)| event.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut ready: Vec<(u64, DebouncedEvent)> = ready_paths
            .into_iter()
            .filter_map(|path| {
                let event = pending.events.remove(&path)?;
                Some((event.seq, StorageEvent::new(path, event.kind)))
            })
            .collect();
        ready.sort_by_key(|(seq, _)| *seq);
        ready.into_iter().map(|(_, event)| event).collect()
    }
}
