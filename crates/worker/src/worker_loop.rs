//! The worker thread: startup, the sequential job loop, teardown.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use chrono::Utc;
use courier_core::{EndpointServer, TransportError, TransportResult};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelWatch;
use crate::connection::Connection;
use crate::error::JobError;
use crate::job::{BoxedJob, Job, JobContext};
use crate::queue::DelayQueue;
use crate::state::{Shared, WorkerState, deadline_after, lock};

/// A job on its way from a caller thread to the worker thread.
pub(crate) struct Enqueued<C: Connection> {
    pub(crate) job: BoxedJob<C>,
    pub(crate) ready_at: Instant,
}

struct Pending<C: Connection> {
    job: BoxedJob<C>,
    attempt: u32,
}

/// Body of the worker thread.
pub(crate) fn run<C, F>(shared: Arc<Shared<C>>, connector: F, inbox: mpsc::Receiver<Enqueued<C>>)
where
    C: Connection,
    F: FnOnce(&EndpointServer, &str) -> TransportResult<C>,
{
    let Some(mut lane) = Lane::open(&shared, connector) else {
        lock(&shared.commands).take();
        shared.set_state(WorkerState::Stopped);
        return;
    };

    if shared.transition(WorkerState::Starting, WorkerState::Running) {
        info!(worker = %shared.config.name, "request worker running");
        lane.run(&inbox);
    } else {
        debug!(worker = %shared.config.name, "shutdown requested during startup");
    }

    lane.close(&inbox);
}

/// Worker-thread side of a started worker.
struct Lane<'a, C: Connection> {
    shared: &'a Shared<C>,
    connection: Arc<C>,
    watch: CancelWatch,
    auth_token: String,
    queue: DelayQueue<Pending<C>>,
}

impl<'a, C: Connection> Lane<'a, C> {
    /// Validate credentials, connect, start the cancel watch and take over the
    /// carry-over queue.
    fn open<F>(shared: &'a Shared<C>, connector: F) -> Option<Self>
    where
        F: FnOnce(&EndpointServer, &str) -> TransportResult<C>,
    {
        let config = &shared.config;

        let Some(auth_token) = config.auth_token.clone().filter(|t| !t.is_empty()) else {
            warn!(worker = %config.name, "invalid token - exiting");
            return None;
        };

        debug!(worker = %config.name, endpoint = %config.endpoint, "connecting");
        let connection = match connector(&config.endpoint, &auth_token) {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                error!(worker = %config.name, endpoint = %config.endpoint, error = %e, "failed to open connection");
                return None;
            }
        };

        let watch = match CancelWatch::spawn(format!("{}-watch", config.name)) {
            Ok(watch) => watch,
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to start cancel watch");
                connection.close();
                return None;
            }
        };

        *lock(&shared.connection) = Some(Arc::clone(&connection));
        *lock(&shared.cancel_watch) = Some(watch.clone());

        let mut queue = DelayQueue::new();
        let now = Instant::now();
        match shared.carry_over.drain_once() {
            Some(pending) => {
                info!(worker = %config.name, jobs = pending.len(), "processing pending jobs queue");
                for job in pending {
                    debug!(worker = %config.name, job_id = %job.id(), "requeueing pending job");
                    queue.push(Pending { job, attempt: 1 }, now);
                }
            }
            None => warn!(worker = %config.name, "carry-over queue was already drained"),
        }

        shared.update_stats(|s| {
            s.started_at = Some(Utc::now());
            s.queue_depth = queue.len();
        });

        Some(Self {
            shared,
            connection,
            watch,
            auth_token,
            queue,
        })
    }

    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn run(&mut self, inbox: &mpsc::Receiver<Enqueued<C>>) {
        loop {
            // Take in everything already sent so ordering is decided by the queue.
            loop {
                match inbox.try_recv() {
                    Ok(enqueued) => self.enqueue(enqueued),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => return,
                }
            }

            if self.shared.state() != WorkerState::Running {
                return;
            }

            let now = Instant::now();
            if let Some(pending) = self.queue.pop_ready(now) {
                self.process(pending);
                let depth = self.queue.len();
                self.shared.update_stats(|s| s.queue_depth = depth);
                continue;
            }

            let next = match self.queue.next_ready_at() {
                Some(at) => match inbox.recv_timeout(at.saturating_duration_since(now)) {
                    Ok(enqueued) => enqueued,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                },
                None => match inbox.recv() {
                    Ok(enqueued) => enqueued,
                    Err(mpsc::RecvError) => return,
                },
            };
            self.enqueue(next);
        }
    }

    fn enqueue(&mut self, enqueued: Enqueued<C>) {
        debug!(worker = %self.name(), job_id = %enqueued.job.id(), kind = enqueued.job.kind(), "job queued");
        self.queue.push(
            Pending {
                job: enqueued.job,
                attempt: 1,
            },
            enqueued.ready_at,
        );
        let depth = self.queue.len();
        self.shared.update_stats(|s| s.queue_depth = depth);
    }

    fn process(&mut self, pending: Pending<C>) {
        let Pending { job, attempt } = pending;
        let shared = self.shared;
        let name = shared.config.name.as_str();
        debug!(worker = name, job_id = %job.id(), kind = job.kind(), attempt, "running job");

        if job.is_canceled() {
            warn!(worker = name, job_id = %job.id(), "request has been canceled - dropping");
            shared.update_stats(|s| s.jobs_canceled += 1);
            return;
        }

        if shared.state() != WorkerState::Running {
            warn!(worker = name, job_id = %job.id(), "request worker is not running - dropping job");
            shared.update_stats(|s| s.jobs_dropped += 1);
            return;
        }

        let dedicated = job.listener();
        let attached = dedicated
            .as_ref()
            .is_some_and(|l| shared.listeners.add(Arc::clone(l)));

        let resource = job.observable().map(|o| o.resource());
        if let Some(resource) = &resource {
            self.watch.watch(resource.clone(), job.cancel_token().clone());
        }

        let outcome = self.execute(&*job, attempt);

        let requeue = match &outcome {
            Ok(response) => {
                debug!(worker = name, job_id = %job.id(), "job completed");
                shared.listeners.dispatch_response(&*job, response);
                false
            }
            Err(e) => {
                match e {
                    JobError::Transport(t) if t.is_abort() => {
                        warn!(worker = name, job_id = %job.id(), attempt, "request aborted")
                    }
                    _ => error!(worker = name, job_id = %job.id(), attempt, error = %e, "request error"),
                }
                let vote = shared.listeners.dispatch_error(&*job, e);
                if vote && !e.is_retryable() {
                    warn!(worker = name, job_id = %job.id(), "ignoring requeue vote for non-transport failure");
                }
                vote && e.is_retryable()
            }
        };

        if let Some(resource) = resource {
            self.watch.unwatch(resource);
        }
        if attached {
            if let Some(listener) = &dedicated {
                shared.listeners.remove(listener);
            }
        }

        let stopping = shared.state() != WorkerState::Running;
        shared.update_stats(|s| {
            s.jobs_processed += 1;
            match (&outcome, requeue) {
                (Ok(_), _) => s.jobs_succeeded += 1,
                (Err(_), true) if stopping => s.jobs_dropped += 1,
                (Err(_), true) => s.jobs_requeued += 1,
                (Err(_), false) => s.jobs_failed += 1,
            }
        });

        if !requeue {
            return;
        }
        if stopping {
            warn!(worker = name, job_id = %job.id(), "request worker is not running - not requeueing job");
            return;
        }

        let delay = shared.config.retry_delay;
        debug!(worker = name, job_id = %job.id(), delay = ?delay, "requeuing job");
        self.queue.push(
            Pending {
                job,
                attempt: attempt + 1,
            },
            deadline_after(delay),
        );
    }

    fn stopping(&self) -> bool {
        self.shared.state() != WorkerState::Running
    }

    /// Run one attempt, turning a panic into a reportable failure.
    fn execute(&self, job: &dyn Job<C>, attempt: u32) -> Result<C::Response, JobError> {
        if attempt > 1 {
            if self.stopping() {
                return Err(TransportError::Aborted.into());
            }
            if let Err(e) = self.connection.reconnect() {
                warn!(worker = %self.name(), job_id = %job.id(), error = %e, "reconnect before retry failed");
                return Err(e.into());
            }
            // Shutdown marks the state before aborting, so anything that slipped
            // in during the reconnect is visible here.
            if self.stopping() {
                return Err(TransportError::Aborted.into());
            }
        }

        let ctx = JobContext {
            worker: self.name(),
            endpoint: &self.shared.config.endpoint,
            auth_token: &self.auth_token,
            attempt,
        };

        panic::catch_unwind(AssertUnwindSafe(|| {
            job.execute(&self.connection, &self.shared.listeners, &ctx)
        }))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Drop whatever is left, release the connection and the cancel watch.
    fn close(mut self, inbox: &mpsc::Receiver<Enqueued<C>>) {
        lock(&self.shared.commands).take();

        let mut dropped = self.queue.drain().len();
        dropped += inbox.try_iter().count();
        if dropped > 0 {
            warn!(worker = %self.name(), dropped, "request worker is not running - dropping queued jobs");
        }

        self.connection.close();
        lock(&self.shared.connection).take();

        lock(&self.shared.cancel_watch).take();
        self.watch.shutdown();

        self.shared.update_stats(|s| {
            s.jobs_dropped += dropped as u64;
            s.queue_depth = 0;
        });
        self.shared.set_state(WorkerState::Stopped);
        info!(worker = %self.name(), "request worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
