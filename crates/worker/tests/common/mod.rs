#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use courier_worker::{
    CancelToken, CarryOverQueue, EndpointServer, InMemoryConnection, Job, JobContext, JobError,
    JobId, Listener, ListenerRegistry, Observable, RequestWorker, ResourceKey, SharedListener,
    TransportError, TransportResult, WorkerConfig,
};
use serde_json::{Value, json};

pub type Worker = RequestWorker<InMemoryConnection>;

pub fn config() -> WorkerConfig {
    WorkerConfig::default()
        .with_name("test-worker")
        .with_auth_token("secret")
        .with_retry_delay(Duration::from_millis(50))
        .with_ready_timeout(Duration::from_secs(2))
        .with_shutdown_timeout(Duration::from_secs(2))
}

pub fn connector(
    conn: InMemoryConnection,
) -> impl FnOnce(&EndpointServer, &str) -> TransportResult<InMemoryConnection> + Send + 'static {
    move |_endpoint: &EndpointServer, _token: &str| Ok(conn)
}

/// Start a worker over `conn` and wait until it accepts jobs.
pub fn running_worker(config: WorkerConfig, conn: &InMemoryConnection) -> Worker {
    let worker = Worker::new(config, CarryOverQueue::new());
    worker.start(connector(conn.clone())).unwrap();
    assert!(eventually(|| worker.is_running()), "worker did not start");
    worker
}

/// Poll `cond` for up to five seconds.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Tracks how many jobs execute at the same time.
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Concurrency {
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum Behavior {
    /// One request on the connection.
    Request,
    Internal(&'static str),
    Panic(&'static str),
    /// Upload in chunks, reporting progress and checking for cancellation.
    Upload { chunks: u32, pause: Duration },
    /// Request while recording overlap with other jobs.
    Track(Arc<Concurrency>),
    /// Request, then keep working for a while without looking at the abort.
    Stall(Duration),
}

pub struct TestJob {
    id: JobId,
    path: String,
    token: CancelToken,
    behavior: Behavior,
    resource: Option<ResourceKey>,
    listener: Option<SharedListener<InMemoryConnection>>,
    cancel_checks: AtomicU32,
    slow_cancel_check: Option<(u32, Duration)>,
}

impl std::fmt::Debug for TestJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestJob")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("token", &self.token)
            .field("behavior", &self.behavior)
            .field("resource", &self.resource)
            .field("listener", &self.listener.is_some())
            .field("cancel_checks", &self.cancel_checks)
            .field("slow_cancel_check", &self.slow_cancel_check)
            .finish()
    }
}

impl TestJob {
    pub fn request(path: &str) -> Self {
        Self {
            id: JobId::new(),
            path: path.to_string(),
            token: CancelToken::new(),
            behavior: Behavior::Request,
            resource: None,
            listener: None,
            cancel_checks: AtomicU32::new(0),
            slow_cancel_check: None,
        }
    }

    /// Make the `nth` cancellation check (1-based) take `pause`.
    pub fn with_slow_cancel_check(mut self, nth: u32, pause: Duration) -> Self {
        self.slow_cancel_check = Some((nth, pause));
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn observing(mut self, resource: &str) -> Self {
        self.resource = Some(ResourceKey::new(resource));
        self
    }

    pub fn with_listener(mut self, listener: SharedListener<InMemoryConnection>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Observable for TestJob {
    fn resource(&self) -> ResourceKey {
        self.resource
            .clone()
            .unwrap_or_else(|| ResourceKey::new(self.path.as_str()))
    }
}

impl Job<InMemoryConnection> for TestJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn kind(&self) -> &str {
        &self.path
    }

    fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    fn is_canceled(&self) -> bool {
        let check = self.cancel_checks.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((nth, pause)) = self.slow_cancel_check {
            if check == nth {
                thread::sleep(pause);
            }
        }
        self.token.is_canceled()
    }

    fn listener(&self) -> Option<SharedListener<InMemoryConnection>> {
        self.listener.clone()
    }

    fn observable(&self) -> Option<&dyn Observable> {
        self.resource.as_ref().map(|_| self as &dyn Observable)
    }

    fn execute(
        &self,
        connection: &InMemoryConnection,
        listeners: &ListenerRegistry<InMemoryConnection>,
        ctx: &JobContext<'_>,
    ) -> Result<Value, JobError> {
        match &self.behavior {
            Behavior::Request => Ok(connection.request(&self.path, json!({ "attempt": ctx.attempt }))?),
            Behavior::Internal(msg) => Err(JobError::internal(*msg)),
            Behavior::Panic(msg) => panic!("{msg}"),
            Behavior::Upload { chunks, pause } => {
                for chunk in 1..=*chunks {
                    if self.is_canceled() {
                        return Err(TransportError::Aborted.into());
                    }
                    listeners.dispatch_upload_progress(self, u64::from(chunk) * 1024);
                    thread::sleep(*pause);
                }
                Ok(connection.request(&self.path, Value::Null)?)
            }
            Behavior::Track(concurrency) => {
                let now = concurrency.current.fetch_add(1, Ordering::SeqCst) + 1;
                concurrency.max.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
                let result = connection.request(&self.path, Value::Null);
                concurrency.current.fetch_sub(1, Ordering::SeqCst);
                Ok(result?)
            }
            Behavior::Stall(busy) => {
                let response = connection.request(&self.path, Value::Null)?;
                thread::sleep(*busy);
                Ok(response)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Upload(JobId, u64),
    Error(JobId, JobError),
    Response(JobId, Value),
}

/// Listener that records every callback with the time it arrived.
#[derive(Debug, Default)]
pub struct Recorder {
    requeue: bool,
    events: Mutex<Vec<(Instant, Event)>>,
}

impl Recorder {
    pub fn new(requeue: bool) -> Arc<Self> {
        Arc::new(Self {
            requeue,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.timed().into_iter().map(|(_, e)| e).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, Event)> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(Instant, JobError)> {
        self.timed()
            .into_iter()
            .filter_map(|(at, e)| match e {
                Event::Error(_, cause) => Some((at, cause)),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<(JobId, Value)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Response(id, value) => Some((id, value)),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Upload(..)))
            .count()
    }

    pub fn for_job(&self, id: JobId) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| match e {
                Event::Upload(job, _) | Event::Error(job, _) | Event::Response(job, _) => *job == id,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }
}

impl Listener<InMemoryConnection> for Recorder {
    fn on_upload_progress(&self, job: &dyn Job<InMemoryConnection>, bytes: u64) {
        self.record(Event::Upload(job.id(), bytes));
    }

    fn on_error(&self, job: &dyn Job<InMemoryConnection>, cause: &JobError) -> bool {
        self.record(Event::Error(job.id(), cause.clone()));
        self.requeue
    }

    fn on_response(&self, job: &dyn Job<InMemoryConnection>, response: &Value) {
        self.record(Event::Response(job.id(), response.clone()));
    }
}
