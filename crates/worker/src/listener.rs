//! Job lifecycle listeners.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::JobError;
use crate::job::Job;

/// Observer of job progress and completion.
///
/// Every callback has a no-op default, so listeners only implement what they
/// care about. Callbacks run on the worker thread (or the job's own thread for
/// progress), so they should return quickly.
pub trait Listener<C: Connection>: Send + Sync {
    fn on_download_progress(&self, _job: &dyn Job<C>, _bytes: u64) {}

    fn on_upload_progress(&self, _job: &dyn Job<C>, _bytes: u64) {}

    /// A job failed. Return `true` to vote for requeueing it.
    ///
    /// The vote only counts for transport failures.
    fn on_error(&self, _job: &dyn Job<C>, _cause: &JobError) -> bool {
        false
    }

    fn on_response(&self, _job: &dyn Job<C>, _response: &C::Response) {}
}

/// Listeners are shared between the registry, jobs and their owners.
pub type SharedListener<C> = Arc<dyn Listener<C>>;
