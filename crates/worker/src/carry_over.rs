//! Jobs collected before the worker is running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::connection::Connection;
use crate::error::{PushError, WorkerError};
use crate::job::{BoxedJob, Job};
use crate::state::lock;

/// Process-scoped list of jobs queued before the worker starts.
///
/// Create one per process (or per worker), hand clones to whoever needs to
/// enqueue early, and pass it to [`RequestWorker::new`](crate::RequestWorker::new).
/// The worker moves the contents into its own queue exactly once when it
/// starts, preserving insertion order, and seals the list; later pushes are
/// rejected and must go through the worker.
pub struct CarryOverQueue<C: Connection> {
    inner: Arc<Mutex<CarryOverState<C>>>,
}

struct CarryOverState<C: Connection> {
    jobs: VecDeque<BoxedJob<C>>,
    sealed: bool,
}

impl<C: Connection> Clone for CarryOverQueue<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Default for CarryOverQueue<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CarryOverState {
                jobs: VecDeque::new(),
                sealed: false,
            })),
        }
    }
}

impl<C: Connection> std::fmt::Debug for CarryOverQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("CarryOverQueue")
            .field("len", &state.jobs.len())
            .field("sealed", &state.sealed)
            .finish()
    }
}

impl<C: Connection> CarryOverQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job. Fails, handing the job back, once the queue was drained.
    pub fn push(&self, job: impl Job<C>) -> Result<(), PushError<C>> {
        self.push_boxed(Box::new(job))
    }

    pub fn push_boxed(&self, job: BoxedJob<C>) -> Result<(), PushError<C>> {
        let mut state = lock(&self.inner);
        if state.sealed {
            return Err(PushError::new(WorkerError::CarryOverSealed, job));
        }
        debug!(job_id = %job.id(), kind = job.kind(), "job parked in carry-over queue");
        state.jobs.push_back(job);
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        lock(&self.inner).sealed
    }

    /// Take every job and seal the queue. Returns `None` if already drained.
    pub(crate) fn drain_once(&self) -> Option<VecDeque<BoxedJob<C>>> {
        let mut state = lock(&self.inner);
        if state.sealed {
            return None;
        }
        state.sealed = true;
        Some(std::mem::take(&mut state.jobs))
    }
}
