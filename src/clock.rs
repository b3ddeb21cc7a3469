//! Revision counter with a level-triggered wake-up.
//!
//! `bump` advances the counter and wakes everyone currently waiting; a waiter
//! that arrives late compares against its own baseline, so a missed pulse
//! never leaves it blocked on a revision that already happened.

use tokio::sync::watch;

#[derive(Debug)]
pub struct RevisionClock {
    tx: watch::Sender<u64>,
}

/// The clock was dropped (its issue was deleted) before the wait finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockClosed;

impl RevisionClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Resume counting from a persisted revision.
    pub fn starting_at(revision: u64) -> Self {
        let (tx, _rx) = watch::channel(revision);
        Self { tx }
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Increment and pulse. Callers serialize bumps (one writer per issue).
    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|rev| {
            *rev += 1;
            next = *rev;
        });
        next
    }

    /// Receiver usable after the clock's owner is gone.
    pub fn subscribe(&self) -> RevisionWatcher {
        RevisionWatcher { rx: self.tx.subscribe() }
    }

    pub async fn wait_for_next_revision(&self, last_seen: u64) -> Result<u64, ClockClosed> {
        self.subscribe().wait_past(last_seen).await
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached waiting end of a [`RevisionClock`]. Dropping it mid-wait has no
/// effect on the clock.
#[derive(Debug, Clone)]
pub struct RevisionWatcher {
    rx: watch::Receiver<u64>,
}

impl RevisionWatcher {
    /// Last revision published; still readable after the clock is gone.
    pub fn current(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Return as soon as the revision exceeds `last_seen`; immediately if it
    /// already does.
    pub async fn wait_past(mut self, last_seen: u64) -> Result<u64, ClockClosed> {
        let rev = self
            .rx
            .wait_for(|rev| *rev > last_seen)
            .await
            .map_err(|_| ClockClosed)?;
        Ok(*rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_bump_increments_by_one() {
        let clock = RevisionClock::new();
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.bump(), 1);
        assert_eq!(clock.bump(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[tokio::test]
    async fn test_stale_baseline_returns_immediately() {
        let clock = RevisionClock::starting_at(5);
        let rev = tokio::time::timeout(Duration::from_millis(50), clock.wait_for_next_revision(3))
            .await
            .expect("should not block");
        assert_eq!(rev, Ok(5));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_bump() {
        let clock = Arc::new(RevisionClock::new());
        let watcher = clock.subscribe();
        let waiter = tokio::spawn(watcher.wait_past(0));
        tokio::task::yield_now().await;
        clock.bump();
        let rev = waiter.await.unwrap();
        assert_eq!(rev, Ok(1));
    }

    #[tokio::test]
    async fn test_abandoned_wait_has_no_side_effects() {
        let clock = RevisionClock::new();
        let res = tokio::time::timeout(Duration::from_millis(10), clock.wait_for_next_revision(0)).await;
        assert!(res.is_err());
        assert_eq!(clock.bump(), 1);
    }

    #[tokio::test]
    async fn test_dropped_clock_releases_waiters() {
        let clock = RevisionClock::new();
        let watcher = clock.subscribe();
        drop(clock);
        assert_eq!(watcher.wait_past(0).await, Err(ClockClosed));
    }
}
