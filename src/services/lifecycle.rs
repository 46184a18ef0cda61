use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Tracks whether the owner of a job is still alive and whether its pipeline
/// has been started.
///
/// Unmounting cancels the root token; every poll and in-flight request runs
/// under a child of it, so all pending timers stop at once.
#[derive(Debug, Default)]
pub struct LifecycleGuard {
    root: CancellationToken,
    started: AtomicBool,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        !self.root.is_cancelled()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Record the start. Returns `false` if the pipeline had already started.
    pub fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Idempotent.
    pub fn mark_unmounted(&self) {
        self.root.cancel();
    }

    /// A token cancelled on unmount, or earlier if cancelled directly.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_only_once() {
        let guard = LifecycleGuard::new();
        assert!(!guard.has_started());
        assert!(guard.mark_started());
        assert!(!guard.mark_started());
        assert!(guard.has_started());
    }

    #[test]
    fn unmount_is_idempotent_and_cancels_children() {
        let guard = LifecycleGuard::new();
        let child = guard.child_token();
        assert!(guard.is_mounted());

        guard.mark_unmounted();
        guard.mark_unmounted();

        assert!(!guard.is_mounted());
        assert!(child.is_cancelled());
        assert!(guard.child_token().is_cancelled());
    }

    #[test]
    fn unmount_wakes_pending_waiters() {
        let guard = LifecycleGuard::new();
        let token = guard.child_token();
        let mut cancelled = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(cancelled.poll());

        guard.mark_unmounted();
        assert!(cancelled.is_woken());
        tokio_test::assert_ready!(cancelled.poll());
    }

    #[test]
    fn cancelling_a_child_leaves_guard_mounted() {
        let guard = LifecycleGuard::new();
        guard.child_token().cancel();
        assert!(guard.is_mounted());
    }
}
