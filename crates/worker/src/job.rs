//! Job contract.

use std::fmt;

use courier_core::{EndpointServer, JobId};

use crate::cancel::{CancelToken, ResourceKey};
use crate::connection::Connection;
use crate::error::JobError;
use crate::listener::SharedListener;
use crate::registry::ListenerRegistry;

/// Per-execution context handed to [`Job::execute`].
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    /// Name of the worker running the job.
    pub worker: &'a str,
    /// Server the connection was opened against.
    pub endpoint: &'a EndpointServer,
    /// Credential the worker was started with.
    pub auth_token: &'a str,
    /// 1 on the first run, incremented every time the job is requeued.
    pub attempt: u32,
}

/// Capability of jobs bound to an external resource (e.g. the stored message
/// an upload is sending).
///
/// While such a job runs, the worker registers its resource with the
/// [`CancelWatch`](crate::CancelWatch); a change signal for that resource
/// cancels the job.
pub trait Observable {
    fn resource(&self) -> ResourceKey;
}

/// A unit of work executed by the request worker.
pub trait Job<C: Connection>: fmt::Debug + Send + 'static {
    fn id(&self) -> JobId;

    /// Short label used in logs.
    fn kind(&self) -> &str {
        "request"
    }

    /// Flag shared with whoever may cancel this job.
    fn cancel_token(&self) -> &CancelToken;

    fn is_canceled(&self) -> bool {
        self.cancel_token().is_canceled()
    }

    /// Listener attached to the registry only while this job runs.
    fn listener(&self) -> Option<SharedListener<C>> {
        None
    }

    fn observable(&self) -> Option<&dyn Observable> {
        None
    }

    /// Run the job against the shared connection.
    ///
    /// Long-running jobs should report progress through `listeners` and check
    /// [`is_canceled`](Self::is_canceled) between chunks of work.
    fn execute(
        &self,
        connection: &C,
        listeners: &ListenerRegistry<C>,
        ctx: &JobContext<'_>,
    ) -> Result<C::Response, JobError>;
}

pub type BoxedJob<C> = Box<dyn Job<C>>;
