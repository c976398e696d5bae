//! Outgoing request worker.
//!
//! A single lane that runs jobs against one shared [`Connection`], one at a
//! time, in the order they were pushed.
//!
//! ## Components
//!
//! - [`RequestWorker`]: the cross-thread handle (start, push, shutdown, listeners)
//! - [`Job`]: unit of work executed against the connection
//! - [`Listener`] / [`ListenerRegistry`]: progress, error and response fan-out
//! - [`CancelWatch`]: independent loop turning resource signals into job cancellation
//! - [`CarryOverQueue`]: jobs collected before the worker is up, drained once on start
//! - [`InMemoryConnection`]: scripted connection for tests/dev
//!
//! ## Retry
//!
//! A job failing with a transport error is offered to every listener; if any of
//! them votes to requeue, the job goes back to the queue after
//! [`WorkerConfig::retry_delay`]. Any other failure is reported but never retried.

pub mod cancel;
pub mod carry_over;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod in_memory;
pub mod job;
pub mod listener;
pub mod queue;
pub mod registry;
pub mod state;

mod worker_loop;

pub use cancel::{CancelToken, CancelWatch, ResourceKey};
pub use carry_over::CarryOverQueue;
pub use config::{ConfigError, WorkerConfig};
pub use connection::Connection;
pub use error::{JobError, PushError, WorkerError};
pub use handle::RequestWorker;
pub use in_memory::{InMemoryConnection, Outcome};
pub use job::{BoxedJob, Job, JobContext, Observable};
pub use listener::{Listener, SharedListener};
pub use queue::DelayQueue;
pub use registry::ListenerRegistry;
pub use state::{WorkerState, WorkerStats};

pub use courier_core::{EndpointServer, JobId, TransportError, TransportResult};
