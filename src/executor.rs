//! Per-mutation status tracking.
//!
//! Every call to a mutation is its own attempt: `Idle → Pending →
//! {Succeeded | Failed}`, and a new call from a terminal state starts a fresh
//! attempt. Attempts are never coalesced or retried. The flags the UI reads
//! always describe the most recently started attempt; an older attempt that
//! resolves late does not overwrite them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum MutationState {
    Idle = 0,
    Pending = 1,
    Succeeded = 2,
    Failed = 3,
}

#[derive(Debug)]
struct StatusInner {
    state: MutationState,
    last_error: Option<RemoteError>,
    /// Number of attempts started so far; also the id of the latest one.
    started: u64,
    in_flight: usize,
}

/// Shared status handle for one mutation instance.
#[derive(Debug, Clone)]
pub struct MutationStatus {
    inner: Arc<Mutex<StatusInner>>,
}

/// Ticket for one attempt. Resolving consumes it, so an attempt reports its
/// terminal status exactly once.
#[derive(Debug)]
#[must_use = "an attempt must be resolved"]
pub struct Attempt {
    id: u64,
    status: MutationStatus,
}

impl Default for MutationStatus {
    fn default() -> Self {
        MutationStatus {
            inner: Arc::new(Mutex::new(StatusInner {
                state: MutationState::Idle,
                last_error: None,
                started: 0,
                in_flight: 0,
            })),
        }
    }
}

impl MutationStatus {
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new attempt and move to `Pending`.
    pub fn begin(&self) -> Attempt {
        let mut inner = self.lock();
        inner.started += 1;
        inner.in_flight += 1;
        inner.state = MutationState::Pending;
        Attempt {
            id: inner.started,
            status: self.clone(),
        }
    }

    pub fn state(&self) -> MutationState {
        self.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == MutationState::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.state() == MutationState::Pending
    }

    pub fn is_success(&self) -> bool {
        self.state() == MutationState::Succeeded
    }

    pub fn is_error(&self) -> bool {
        self.state() == MutationState::Failed
    }

    /// Error of the latest failed attempt; cleared when a new attempt starts
    /// and succeeds.
    pub fn last_error(&self) -> Option<RemoteError> {
        self.lock().last_error.clone()
    }

    /// Attempts started but not yet resolved, across all callers.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Back to `Idle`, forgetting the last error.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.in_flight == 0 {
            inner.state = MutationState::Idle;
            inner.last_error = None;
        }
    }
}

impl Attempt {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn succeed(self) {
        self.resolve(None);
    }

    pub fn fail(self, error: RemoteError) {
        self.resolve(Some(error));
    }

    fn resolve(self, error: Option<RemoteError>) {
        let mut inner = self.status.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.started != self.id {
            return;
        }
        match error {
            Some(e) => {
                inner.state = MutationState::Failed;
                inner.last_error = Some(e);
            }
            None => {
                inner.state = MutationState::Succeeded;
                inner.last_error = None;
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
