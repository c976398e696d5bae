//! Public, cross-thread handle to the request worker.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use courier_core::{EndpointServer, TransportResult};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelWatch;
use crate::carry_over::CarryOverQueue;
use crate::config::WorkerConfig;
use crate::connection::Connection;
use crate::error::{PushError, WorkerError};
use crate::job::{BoxedJob, Job};
use crate::listener::SharedListener;
use crate::registry::ListenerRegistry;
use crate::state::{Shared, WorkerState, WorkerStats, deadline_after, lock};
use crate::worker_loop::{self, Enqueued};

/// Handle to a request worker.
///
/// Clones are cheap and may be used from any thread. The worker thread itself
/// is spawned by [`start`](Self::start) and runs until [`shutdown`](Self::shutdown);
/// dropping handles does not stop it.
pub struct RequestWorker<C: Connection> {
    shared: Arc<Shared<C>>,
}

impl<C: Connection> Clone for RequestWorker<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> std::fmt::Debug for RequestWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestWorker")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .field("listeners", &self.shared.listeners)
            .finish()
    }
}

impl<C: Connection> RequestWorker<C> {
    /// Create a stopped worker that will drain `carry_over` when it starts.
    pub fn new(config: WorkerConfig, carry_over: CarryOverQueue<C>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, carry_over)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Spawn the worker thread.
    ///
    /// The thread opens the connection through `connector` with the configured
    /// endpoint and auth token, then drains the carry-over queue. Startup
    /// failures (missing token, connection refused) are logged and leave the
    /// worker stopped; pending and later pushes fail with [`WorkerError::Stopped`].
    pub fn start<F>(&self, connector: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&EndpointServer, &str) -> TransportResult<C> + Send + 'static,
    {
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if lifecycle.started {
                return Err(WorkerError::AlreadyStarted);
            }
            lifecycle.started = true;
            lifecycle.state = WorkerState::Starting;
        }
        self.shared.state_changed.notify_all();

        let (tx, rx) = mpsc::channel::<Enqueued<C>>();
        *lock(&self.shared.commands) = Some(tx);

        let name = self.shared.config.name.clone();
        info!(worker = %name, endpoint = %self.shared.config.endpoint, "starting request worker");

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop::run(shared, connector, rx));

        match spawned {
            Ok(join) => {
                *lock(&self.shared.join) = Some(join);
                Ok(())
            }
            Err(e) => {
                error!(worker = %name, error = %e, "failed to spawn request worker thread");
                lock(&self.shared.commands).take();
                self.shared.set_state(WorkerState::Stopped);
                Err(WorkerError::Spawn(e.to_string()))
            }
        }
    }

    /// Enqueue a job for immediate execution.
    pub fn push(&self, job: impl Job<C>) -> Result<(), PushError<C>> {
        self.push_boxed(Box::new(job), Duration::ZERO)
    }

    /// Enqueue a job to run no earlier than `delay` from now.
    ///
    /// A delay too large to represent as an `Instant` is clamped to a
    /// deadline decades away; the job then only leaves the queue on shutdown.
    pub fn push_delayed(&self, job: impl Job<C>, delay: Duration) -> Result<(), PushError<C>> {
        self.push_boxed(Box::new(job), delay)
    }

    /// Enqueue an already boxed job.
    ///
    /// While the worker is starting (or not started yet) this blocks for up to
    /// [`WorkerConfig::ready_timeout`]. If the worker is not running by then
    /// the call fails with [`WorkerError::NotReady`] and the job is handed
    /// back; it is never silently dropped.
    pub fn push_boxed(&self, job: BoxedJob<C>, delay: Duration) -> Result<(), PushError<C>> {
        if let Err(reason) = self.wait_until_ready() {
            warn!(worker = %self.shared.config.name, job_id = %job.id(), %reason, "rejecting job");
            return Err(PushError::new(reason, job));
        }

        let ready_at = deadline_after(delay);
        let commands = lock(&self.shared.commands);
        let Some(tx) = commands.as_ref() else {
            return Err(PushError::new(WorkerError::Stopped, job));
        };
        tx.send(Enqueued { job, ready_at })
            .map_err(|mpsc::SendError(enqueued)| PushError::new(WorkerError::Stopped, enqueued.job))
    }

    /// Wait (bounded) until the worker leaves the not-yet-running states.
    fn wait_until_ready(&self) -> Result<(), WorkerError> {
        let settled = self
            .shared
            .wait_for(self.shared.config.ready_timeout, |lifecycle| match lifecycle.state {
                WorkerState::Running | WorkerState::Stopping => true,
                WorkerState::Stopped => lifecycle.started,
                WorkerState::Starting => false,
            });

        if !settled {
            return Err(WorkerError::NotReady);
        }
        match self.shared.state() {
            WorkerState::Running => Ok(()),
            _ => Err(WorkerError::Stopped),
        }
    }

    /// Register a permanent listener. Returns `false` if already registered.
    pub fn add_listener(&self, listener: SharedListener<C>) -> bool {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &SharedListener<C>) -> bool {
        self.shared.listeners.remove(listener)
    }

    pub fn listeners(&self) -> &ListenerRegistry<C> {
        &self.shared.listeners
    }

    /// True while the worker accepts and processes jobs.
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Handle for delivering resource-change signals; `None` unless the
    /// worker is up.
    pub fn cancel_watch(&self) -> Option<CancelWatch> {
        lock(&self.shared.cancel_watch).clone()
    }

    pub fn stats(&self) -> WorkerStats {
        lock(&self.shared.stats).clone()
    }

    /// Stop the worker and wait for its thread.
    ///
    /// Aborts the in-flight request, if any, and discards queued jobs. Waits at
    /// most [`WorkerConfig::shutdown_timeout`]; a thread still busy after that
    /// is detached. Calling it again, or on a worker that never started, is a
    /// no-op.
    pub fn shutdown(&self) {
        let name = self.shared.config.name.as_str();

        let previous = {
            let mut lifecycle = lock(&self.shared.lifecycle);
            let previous = lifecycle.state;
            if matches!(previous, WorkerState::Starting | WorkerState::Running) {
                lifecycle.state = WorkerState::Stopping;
            }
            previous
        };

        match previous {
            WorkerState::Stopped => {
                debug!(worker = name, "request worker not running - nothing to shut down");
                return;
            }
            WorkerState::Stopping => debug!(worker = name, "shutdown already in progress"),
            WorkerState::Starting | WorkerState::Running => {
                self.shared.state_changed.notify_all();
                warn!(worker = name, "shutting down");

                let connection = lock(&self.shared.connection).clone();
                if let Some(connection) = connection {
                    connection.abort();
                }

                // Dropping the sender wakes the worker if it is idle.
                lock(&self.shared.commands).take();

                let watch = lock(&self.shared.cancel_watch).take();
                if let Some(watch) = watch {
                    watch.shutdown();
                }
            }
        }

        let join = lock(&self.shared.join).take();
        let on_worker_thread = join
            .as_ref()
            .is_some_and(|j| j.thread().id() == thread::current().id());
        if on_worker_thread {
            // Called from a listener or job: the loop exits once it returns.
            debug!(worker = name, "shutdown requested from the worker thread");
            *lock(&self.shared.join) = join;
            return;
        }

        let timeout = self.shared.config.shutdown_timeout;
        let stopped = self
            .shared
            .wait_for(timeout, |lifecycle| lifecycle.state == WorkerState::Stopped);

        match join {
            Some(join) if stopped => {
                if join.join().is_err() {
                    error!(worker = name, "request worker thread panicked");
                }
            }
            Some(_) => {
                warn!(worker = name, ?timeout, "request worker did not stop in time - detaching thread");
            }
            None => {}
        }

        if stopped {
            info!(worker = name, "exiting");
        }
    }
}
