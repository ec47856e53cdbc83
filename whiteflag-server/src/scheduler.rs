//! Per-record one-shot timers.
//!
//! At most one outstanding delayed action per `(record, kind)` key: arming
//! replaces any existing timer for the key, so re-arming is idempotent.
//! Disarming aborts the spawned task synchronously. A delay of zero still
//! goes through `tokio::spawn`, so "already due" and "due in the future"
//! share one control-flow shape.
//!
//! The scheduler never touches records itself. Fired actions are futures
//! supplied by the engine, and the engine's handlers re-read the record and
//! re-validate their guard before doing anything.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

use whiteflag_core::RequestId;

/// The two delayed actions a live window carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Expiry,
    Warning,
}

/// Key for one outstanding timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub request_id: RequestId,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn new(request_id: RequestId, kind: TimerKind) -> Self {
        Self { request_id, kind }
    }
}

/// Table of armed timers.
#[derive(Default)]
pub struct TimerScheduler {
    tasks: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer: after `delay`, run `action` on the runtime.
    ///
    /// Replaces (cancel-then-set) any existing timer for the same key.
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, key: TimerKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            action.await;
        });

        let mut tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        if let Some(old) = tasks.insert(key, handle) {
            old.abort();
        }
        tasks.retain(|_, h| !h.is_finished());
    }

    /// Cancel the timer for a key, if armed. Returns whether one was live.
    pub fn disarm(&self, key: &TimerKey) -> bool {
        let mut tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        match tasks.remove(key) {
            Some(handle) => {
                let was_live = !handle.is_finished();
                handle.abort();
                was_live
            }
            None => false,
        }
    }

    /// Cancel both timers of a record.
    pub fn disarm_record(&self, request_id: RequestId) {
        self.disarm(&TimerKey::new(request_id, TimerKind::Expiry));
        self.disarm(&TimerKey::new(request_id, TimerKind::Warning));
    }

    /// True while the timer for a key is armed and has not yet run.
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        let tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Number of armed, not-yet-fired timers.
    pub fn armed_count(&self) -> usize {
        let tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        tasks.values().filter(|h| !h.is_finished()).count()
    }

    /// Abort everything. Used on shutdown.
    pub fn clear(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler mutex poisoned");
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(kind: TimerKind) -> (RequestId, TimerKey) {
        let id = RequestId::new();
        (id, TimerKey::new(id, kind))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let scheduler = TimerScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (_, key) = key(TimerKind::Expiry);

        let fired_clone = fired.clone();
        scheduler.arm(key, Duration::from_secs(60), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_secs(59)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_armed(&key));

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_the_old_timer() {
        let scheduler = TimerScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (_, key) = key(TimerKind::Expiry);

        for _ in 0..3 {
            let fired_clone = fired.clone();
            scheduler.arm(key, Duration::from_secs(10), async move {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        // Only the last armed action runs.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let scheduler = TimerScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (_, key) = key(TimerKind::Warning);

        let fired_clone = fired.clone();
        scheduler.arm(key, Duration::from_secs(10), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.disarm(&key));

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_still_runs_asynchronously() {
        let scheduler = TimerScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (_, key) = key(TimerKind::Warning);

        let fired_clone = fired.clone();
        scheduler.arm(key, Duration::ZERO, async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Not fired inline during arm.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_record_clears_both_kinds() {
        let scheduler = TimerScheduler::new();
        let id = RequestId::new();

        scheduler.arm(
            TimerKey::new(id, TimerKind::Expiry),
            Duration::from_secs(10),
            async {},
        );
        scheduler.arm(
            TimerKey::new(id, TimerKind::Warning),
            Duration::from_secs(5),
            async {},
        );
        assert_eq!(scheduler.armed_count(), 2);

        scheduler.disarm_record(id);
        assert_eq!(scheduler.armed_count(), 0);
    }
}
