//! Multi-subscriber listener fan-out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::error;

use crate::connection::Connection;
use crate::error::JobError;
use crate::job::Job;
use crate::listener::{Listener, SharedListener};

/// Thread-safe set of listeners that behaves like a single listener.
///
/// - Every dispatch works on a snapshot taken when it starts: listeners added
///   meanwhile are not called, listeners removed meanwhile still are.
/// - Callbacks may add or remove listeners without deadlocking.
/// - A panicking listener is logged and skipped; the rest still get the event.
pub struct ListenerRegistry<C: Connection> {
    listeners: RwLock<Vec<SharedListener<C>>>,
}

impl<C: Connection> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<C: Connection> std::fmt::Debug for ListenerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

fn same_listener<C: Connection>(a: &SharedListener<C>, b: &SharedListener<C>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<C: Connection> ListenerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: SharedListener<C>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &SharedListener<C>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn contains(&self, listener: &SharedListener<C>) -> bool {
        self.snapshot().iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<SharedListener<C>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call `f` on every listener of the current snapshot.
    fn for_each(&self, event: &'static str, job: &dyn Job<C>, mut f: impl FnMut(&dyn Listener<C>)) {
        for listener in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if outcome.is_err() {
                error!(event, job_id = %job.id(), "listener panicked");
            }
        }
    }

    pub fn dispatch_download_progress(&self, job: &dyn Job<C>, bytes: u64) {
        self.for_each("download_progress", job, |l| l.on_download_progress(job, bytes));
    }

    pub fn dispatch_upload_progress(&self, job: &dyn Job<C>, bytes: u64) {
        self.for_each("upload_progress", job, |l| l.on_upload_progress(job, bytes));
    }

    /// Notify every listener and return `true` if any of them voted to requeue.
    pub fn dispatch_error(&self, job: &dyn Job<C>, cause: &JobError) -> bool {
        let mut requeue = false;
        self.for_each("error", job, |l| {
            if l.on_error(job, cause) {
                requeue = true;
            }
        });
        requeue
    }

    pub fn dispatch_response(&self, job: &dyn Job<C>, response: &C::Response) {
        self.for_each("response", job, |l| l.on_response(job, response));
    }
}

impl<C: Connection> Listener<C> for ListenerRegistry<C> {
    fn on_download_progress(&self, job: &dyn Job<C>, bytes: u64) {
        self.dispatch_download_progress(job, bytes);
    }

    fn on_upload_progress(&self, job: &dyn Job<C>, bytes: u64) {
        self.dispatch_upload_progress(job, bytes);
    }

    fn on_error(&self, job: &dyn Job<C>, cause: &JobError) -> bool {
        self.dispatch_error(job, cause)
    }

    fn on_response(&self, job: &dyn Job<C>, response: &C::Response) {
        self.dispatch_response(job, response);
    }
}
