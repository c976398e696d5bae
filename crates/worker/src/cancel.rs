//! Job cancellation: shared flags plus the loop that flips them.
//!
//! The watch loop runs on its own thread, next to the worker thread. Observable
//! jobs register the resource they depend on for the duration of their
//! execution; anyone may then signal that the resource changed (deleted,
//! edited, ...) and the loop cancels the job bound to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use tracing::{debug, info, warn};

use crate::state::lock;

/// Cancellation flag shared between a job and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Name of an external resource an observable job depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

enum WatchCommand {
    Watch(ResourceKey, CancelToken),
    Unwatch(ResourceKey),
    Changed(ResourceKey),
    Quit,
}

/// Handle to the cancellation watch loop.
///
/// Cloning is cheap; all clones talk to the same loop.
#[derive(Debug, Clone)]
pub struct CancelWatch {
    inner: Arc<WatchInner>,
}

#[derive(Debug)]
struct WatchInner {
    name: String,
    commands: Mutex<Option<mpsc::Sender<WatchCommand>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CancelWatch {
    /// Start the watch loop on a dedicated thread.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<WatchCommand>();

        let loop_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || watch_loop(&loop_name, rx))?;

        Ok(Self {
            inner: Arc::new(WatchInner {
                name,
                commands: Mutex::new(Some(tx)),
                join: Mutex::new(Some(join)),
            }),
        })
    }

    /// Bind `token` to `resource` until [`unwatch`](Self::unwatch).
    pub fn watch(&self, resource: ResourceKey, token: CancelToken) {
        self.send(WatchCommand::Watch(resource, token));
    }

    pub fn unwatch(&self, resource: ResourceKey) {
        self.send(WatchCommand::Unwatch(resource));
    }

    /// Signal that `resource` changed; the job watching it (if any) is canceled.
    ///
    /// Returns `false` when the loop has already stopped.
    pub fn resource_changed(&self, resource: impl Into<ResourceKey>) -> bool {
        self.send(WatchCommand::Changed(resource.into()))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.commands).is_some()
    }

    /// Stop the loop and wait for its thread. Idempotent.
    pub fn shutdown(&self) {
        let Some(tx) = lock(&self.inner.commands).take() else {
            return;
        };
        let _ = tx.send(WatchCommand::Quit);
        drop(tx);

        let join = lock(&self.inner.join).take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                return;
            }
            if join.join().is_err() {
                warn!(watch = %self.inner.name, "cancel watch thread panicked");
            }
        }
    }

    fn send(&self, cmd: WatchCommand) -> bool {
        match lock(&self.inner.commands).as_ref() {
            Some(tx) => tx.send(cmd).is_ok(),
            None => {
                debug!(watch = %self.inner.name, "cancel watch stopped - dropping command");
                false
            }
        }
    }
}

fn watch_loop(name: &str, rx: mpsc::Receiver<WatchCommand>) {
    info!(watch = name, "cancel watch started");
    let mut watched: HashMap<ResourceKey, CancelToken> = HashMap::new();

    while let Ok(cmd) = rx.recv() {
        match cmd {
            WatchCommand::Watch(resource, token) => {
                debug!(watch = name, %resource, "watching resource");
                watched.insert(resource, token);
            }
            WatchCommand::Unwatch(resource) => {
                debug!(watch = name, %resource, "no longer watching resource");
                watched.remove(&resource);
            }
            WatchCommand::Changed(resource) => match watched.get(&resource) {
                Some(token) => {
                    info!(watch = name, %resource, "watched resource changed - canceling job");
                    token.cancel();
                }
                None => debug!(watch = name, %resource, "ignoring change of unwatched resource"),
            },
            WatchCommand::Quit => break,
        }
    }

    info!(watch = name, "cancel watch stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn eventually(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_canceled());
        token.cancel();
        assert!(other.is_canceled());
    }

    #[test]
    fn change_signal_cancels_watched_token() {
        let watch = CancelWatch::spawn("watch-test").unwrap();
        let token = CancelToken::new();

        watch.watch("msg/1".into(), token.clone());
        assert!(watch.resource_changed("msg/1"));

        assert!(eventually(|| token.is_canceled()));
        watch.shutdown();
    }

    #[test]
    fn unwatched_and_unknown_resources_are_ignored() {
        let watch = CancelWatch::spawn("watch-test").unwrap();
        let token = CancelToken::new();

        watch.watch("msg/1".into(), token.clone());
        watch.unwatch("msg/1".into());
        watch.resource_changed("msg/1");
        watch.resource_changed("msg/2");

        // Commands are processed in order, so once shutdown has joined the
        // loop every signal above has been handled.
        watch.shutdown();
        assert!(!token.is_canceled());
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_later_signals() {
        let watch = CancelWatch::spawn("watch-test").unwrap();
        assert!(watch.is_running());

        watch.shutdown();
        watch.shutdown();

        assert!(!watch.is_running());
        assert!(!watch.resource_changed("msg/1"));
    }
}
