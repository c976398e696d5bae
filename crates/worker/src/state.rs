//! Lifecycle state shared between the handle and the worker thread.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cancel::CancelWatch;
use crate::carry_over::CarryOverQueue;
use crate::config::WorkerConfig;
use crate::connection::Connection;
use crate::registry::ListenerRegistry;
use crate::worker_loop::Enqueued;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upper bound for any deadline computed from a caller-supplied duration.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// `now + delay`, saturating instead of panicking on `Instant` overflow.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(MAX_WAIT))
        .unwrap_or(now)
}

/// Lifecycle of the worker.
///
/// `Stopped → Starting → Running → Stopping → Stopped`. A worker runs once;
/// after it stops it stays stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub jobs_canceled: u64,
    /// Discarded because the worker was stopping.
    pub jobs_dropped: u64,
    pub queue_depth: usize,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub(crate) state: WorkerState,
    /// Set by the first `start`; a worker never starts twice.
    pub(crate) started: bool,
}

/// Everything the handle and the worker thread both need.
pub(crate) struct Shared<C: Connection> {
    pub(crate) config: WorkerConfig,
    pub(crate) listeners: ListenerRegistry<C>,
    pub(crate) carry_over: CarryOverQueue<C>,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) state_changed: Condvar,
    pub(crate) commands: Mutex<Option<mpsc::Sender<Enqueued<C>>>>,
    pub(crate) connection: Mutex<Option<Arc<C>>>,
    pub(crate) cancel_watch: Mutex<Option<CancelWatch>>,
    pub(crate) join: Mutex<Option<thread::JoinHandle<()>>>,
    pub(crate) stats: Mutex<WorkerStats>,
}

impl<C: Connection> Shared<C> {
    pub(crate) fn new(config: WorkerConfig, carry_over: CarryOverQueue<C>) -> Self {
        Self {
            config,
            listeners: ListenerRegistry::new(),
            carry_over,
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Stopped,
                started: false,
            }),
            state_changed: Condvar::new(),
            commands: Mutex::new(None),
            connection: Mutex::new(None),
            cancel_watch: Mutex::new(None),
            join: Mutex::new(None),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        lock(&self.lifecycle).state
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        lock(&self.lifecycle).state = state;
        self.state_changed.notify_all();
    }

    /// Move `from → to` only if the worker is currently in `from`.
    pub(crate) fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state != from {
            return false;
        }
        lifecycle.state = to;
        drop(lifecycle);
        self.state_changed.notify_all();
        true
    }

    /// Block until `done` holds for the lifecycle or `timeout` elapses.
    /// Returns the final check.
    pub(crate) fn wait_for(&self, timeout: Duration, done: impl Fn(&Lifecycle) -> bool) -> bool {
        let deadline = deadline_after(timeout);
        let mut lifecycle = lock(&self.lifecycle);
        loop {
            if done(&lifecycle) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .state_changed
                .wait_timeout(lifecycle, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            lifecycle = guard;
        }
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut WorkerStats)) {
        f(&mut lock(&self.stats));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::in_memory::InMemoryConnection;

    fn shared() -> Arc<Shared<InMemoryConnection>> {
        Arc::new(Shared::new(WorkerConfig::default(), CarryOverQueue::new()))
    }

    #[test]
    fn stats_serialize_for_status_reports() {
        let stats = WorkerStats {
            jobs_processed: 3,
            jobs_succeeded: 2,
            jobs_failed: 1,
            ..WorkerStats::default()
        };

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["jobs_processed"], json!(3));
        assert_eq!(value["started_at"], json!(null));
        assert_eq!(serde_json::to_value(WorkerState::Stopping).unwrap(), json!("stopping"));
    }

    #[test]
    fn transition_requires_the_expected_state() {
        let shared = shared();
        assert!(!shared.transition(WorkerState::Starting, WorkerState::Running));
        assert_eq!(shared.state(), WorkerState::Stopped);

        shared.set_state(WorkerState::Starting);
        assert!(shared.transition(WorkerState::Starting, WorkerState::Running));
        assert_eq!(shared.state(), WorkerState::Running);
    }

    #[test]
    fn deadline_saturates_on_huge_delays() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > before + Duration::from_secs(60 * 60 * 24 * 365));

        let short = deadline_after(Duration::from_millis(5));
        assert!(short >= before + Duration::from_millis(5));
    }

    #[test]
    fn wait_for_accepts_unbounded_timeout() {
        let shared = shared();
        assert!(shared.wait_for(Duration::MAX, |l| l.state == WorkerState::Stopped));
    }

    #[test]
    fn wait_for_times_out_or_wakes_on_change() {
        let shared = shared();
        assert!(!shared.wait_for(Duration::from_millis(20), |l| l.state == WorkerState::Running));

        let setter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shared.set_state(WorkerState::Running);
            })
        };
        assert!(shared.wait_for(Duration::from_secs(5), |l| l.state == WorkerState::Running));
        setter.join().unwrap();
    }
}
