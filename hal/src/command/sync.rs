//! Submission milestones shared between a command buffer and the backend
//! executing it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// Identifier of one queue submission, increasing in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionId(pub(crate) u64);

impl SubmissionId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submission {}", self.0)
    }
}

/// Lifecycle of a command buffer's work. Variants are ordered; a buffer
/// only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SubmissionStatus {
    /// Still recording.
    #[default]
    NotSubmitted,
    /// Handed to a queue, not yet accepted by the device.
    Submitted,
    /// Accepted by the device for execution.
    Scheduled,
    /// All work finished executing.
    Completed,
}

/// Blocking milestone tracker.
pub(crate) struct SubmissionState {
    status: Mutex<SubmissionStatus>,
    changed: Condvar,
    id: AtomicU64,
}

impl SubmissionState {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(SubmissionStatus::NotSubmitted),
            changed: Condvar::new(),
            id: AtomicU64::new(0),
        }
    }

    pub(crate) fn status(&self) -> SubmissionStatus {
        match self.status.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn id(&self) -> Option<SubmissionId> {
        match self.id.load(Ordering::Acquire) {
            0 => None,
            raw => Some(SubmissionId(raw)),
        }
    }

    pub(crate) fn set_id(&self, id: SubmissionId) {
        self.id.store(id.0, Ordering::Release);
    }

    /// Move to `status` if it is later than the current one; wakes waiters.
    pub(crate) fn advance(&self, status: SubmissionStatus) {
        let mut current = match self.status.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        if status > *current {
            *current = status;
            self.changed.notify_all();
        }
    }

    /// Block until the status reaches at least `target`.
    pub(crate) fn wait_for(&self, target: SubmissionStatus) {
        let mut current = match self.status.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *current < target {
            current = match self.changed.wait(current) {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl fmt::Debug for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionState")
            .field("status", &self.status())
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_status_only_moves_forward() {
        let state = SubmissionState::new();
        state.advance(SubmissionStatus::Completed);
        state.advance(SubmissionStatus::Scheduled);
        assert_eq!(state.status(), SubmissionStatus::Completed);
    }

    #[test]
    fn test_wait_for_wakes_on_advance() {
        let state = Arc::new(SubmissionState::new());
        let worker = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                state.advance(SubmissionStatus::Scheduled);
                state.advance(SubmissionStatus::Completed);
            })
        };
        state.wait_for(SubmissionStatus::Completed);
        assert_eq!(state.status(), SubmissionStatus::Completed);
        worker.join().unwrap();
    }

    #[test]
    fn test_id_unset_until_submitted() {
        let state = SubmissionState::new();
        assert_eq!(state.id(), None);
        state.set_id(SubmissionId(7));
        assert_eq!(state.id(), Some(SubmissionId(7)));
    }
}
