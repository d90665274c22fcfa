//! Cooperative pause/cancel flags shared between one worker and the
//! control endpoints.
//!
//! Control requests only flip flags here; they never touch the task record.
//! The worker reads the flags at window boundaries and commits the matching
//! status transitions itself, so a pause takes effect within one window.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Result of waiting out a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// The pause flag was cleared; processing continues.
    Resumed,
    /// A cancel request arrived while paused.
    Cancelled,
}

/// Per-task pause/cancel flags plus a pause-cycle generation counter.
///
/// Written by control requests from arbitrary contexts, read by the single
/// worker driving the task. The [`Notify`] wakes a worker blocked in
/// [`wait_while_paused`] so a paused task neither spins nor misses a
/// resume/cancel.
///
/// [`wait_while_paused`]: ControlSignal::wait_while_paused
#[derive(Debug, Default)]
pub struct ControlSignal {
    paused: AtomicBool,
    cancelled: AtomicBool,
    /// Completed pause/resume cycles; bumped on each observed resume.
    generation: AtomicU64,
    changed: Notify,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause. Returns `false` if a pause was already requested,
    /// in which case the call is a no-op.
    pub fn request_pause(&self) -> bool {
        let flipped = self
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.changed.notify_one();
        }
        flipped
    }

    /// Clear a pending pause. Returns `false` if the task was not paused.
    pub fn request_resume(&self) -> bool {
        let flipped = self
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.changed.notify_one();
        }
        flipped
    }

    /// Request cancellation. Returns `false` on repeated requests.
    /// Cancellation is one-way; it also wakes a worker blocked on a pause.
    pub fn request_cancel(&self) -> bool {
        let flipped = self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            self.changed.notify_one();
        }
        flipped
    }

    pub fn pause_requested(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Number of completed pause/resume cycles so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Block until the pause flag clears or a cancel arrives.
    ///
    /// Returns immediately if the task is not paused. Only the task's
    /// single worker calls this, so one notify permit is enough to wake it;
    /// the loop re-checks the flags after every wakeup.
    pub async fn wait_while_paused(&self) -> PauseOutcome {
        loop {
            if self.cancel_requested() {
                return PauseOutcome::Cancelled;
            }
            if !self.pause_requested() {
                return PauseOutcome::Resumed;
            }
            self.changed.notified().await;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn repeated_requests_are_no_ops() {
        let signal = ControlSignal::new();
        assert!(signal.request_pause());
        assert!(!signal.request_pause());
        assert!(signal.request_resume());
        assert!(!signal.request_resume());
        assert!(signal.request_cancel());
        assert!(!signal.request_cancel());
    }

    #[test]
    fn generation_counts_pause_resume_cycles() {
        let signal = ControlSignal::new();
        assert_eq!(signal.generation(), 0);
        signal.request_pause();
        signal.request_resume();
        signal.request_pause();
        signal.request_resume();
        assert_eq!(signal.generation(), 2);
        // A resume without a pending pause does not count.
        signal.request_resume();
        assert_eq!(signal.generation(), 2);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_not_paused() {
        let signal = ControlSignal::new();
        let outcome = timeout(Duration::from_millis(100), signal.wait_while_paused())
            .await
            .expect("wait should not block");
        assert_eq!(outcome, PauseOutcome::Resumed);
    }

    #[tokio::test]
    async fn resume_wakes_a_paused_waiter() {
        let signal = Arc::new(ControlSignal::new());
        signal.request_pause();

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_while_paused().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.request_resume();

        let outcome = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(outcome, PauseOutcome::Resumed);
    }

    #[tokio::test]
    async fn cancel_wins_over_pause() {
        let signal = Arc::new(ControlSignal::new());
        signal.request_pause();

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait_while_paused().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.request_cancel();

        let outcome = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(outcome, PauseOutcome::Cancelled);
        // The pause flag is untouched; cancel simply takes precedence.
        assert!(signal.pause_requested());
    }

    #[tokio::test]
    async fn resume_before_wait_is_not_lost() {
        // The notify permit is stored, so a resume that lands between the
        // worker's flag check and its await must still wake it.
        let signal = Arc::new(ControlSignal::new());
        signal.request_pause();
        signal.request_resume();
        let outcome = timeout(Duration::from_millis(100), signal.wait_while_paused())
            .await
            .expect("stored permit should prevent blocking");
        assert_eq!(outcome, PauseOutcome::Resumed);
    }
}
