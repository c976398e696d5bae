//! In-memory connection for tests/dev.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use courier_core::{TransportError, TransportResult};
use serde_json::{Value, json};

use crate::connection::Connection;
use crate::state::lock;

/// Scripted result of the next request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Respond(Value),
    Fail(TransportError),
    /// Block until the connection is aborted (simulates a stalled transfer).
    Hang,
}

/// Connection that answers from a script instead of the network.
///
/// - No IO; requests are recorded and answered in order from the script
/// - An empty script echoes the request back
/// - `abort` wakes hanging requests and fails new ones until `reconnect`
///
/// Clones share state, so a test can keep one and hand another to the worker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnection {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<ConnState>,
    wake: Condvar,
}

#[derive(Debug, Default)]
struct ConnState {
    script: VecDeque<Outcome>,
    requests: Vec<String>,
    aborted: bool,
    closed: bool,
    reconnects: u32,
    aborts: u32,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let conn = Self::new();
        lock(&conn.inner.state).script.extend(outcomes);
        conn
    }

    /// Queue the outcome of a future request.
    pub fn push_outcome(&self, outcome: Outcome) {
        lock(&self.inner.state).script.push_back(outcome);
    }

    /// Perform a request against the script.
    pub fn request(&self, path: &str, body: Value) -> TransportResult<Value> {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return Err(TransportError::unreachable("connection closed"));
        }
        if state.aborted {
            return Err(TransportError::Aborted);
        }
        state.requests.push(path.to_string());

        match state.script.pop_front() {
            None => Ok(json!({ "path": path, "body": body })),
            Some(Outcome::Respond(value)) => Ok(value),
            Some(Outcome::Fail(err)) => Err(err),
            Some(Outcome::Hang) => {
                while !state.aborted {
                    state = self
                        .inner
                        .wake
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Err(TransportError::Aborted)
            }
        }
    }

    /// Paths of every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.inner.state).requests.clone()
    }

    pub fn reconnects(&self) -> u32 {
        lock(&self.inner.state).reconnects
    }

    pub fn aborts(&self) -> u32 {
        lock(&self.inner.state).aborts
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }
}

impl Connection for InMemoryConnection {
    type Response = Value;

    fn reconnect(&self) -> TransportResult<()> {
        let mut state = lock(&self.inner.state);
        if state.closed {
            return Err(TransportError::unreachable("connection closed"));
        }
        state.aborted = false;
        state.reconnects += 1;
        Ok(())
    }

    fn abort(&self) {
        let mut state = lock(&self.inner.state);
        state.aborted = true;
        state.aborts += 1;
        self.inner.wake.notify_all();
    }

    fn close(&self) {
        let mut state = lock(&self.inner.state);
        state.closed = true;
        state.aborted = true;
        self.inner.wake.notify_all();
    }
}
