//! Worker configuration.

use std::time::Duration;

use courier_core::EndpointServer;
use thiserror::Error;

/// Delay before a failed job is retried after a requeue vote.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How long `push` waits for the worker to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on how long `shutdown` waits for the worker thread.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_NAME: &str = "COURIER_WORKER_NAME";
pub const ENV_ENDPOINT: &str = "COURIER_ENDPOINT";
pub const ENV_AUTH_TOKEN: &str = "COURIER_AUTH_TOKEN";
pub const ENV_RETRY_DELAY_MS: &str = "COURIER_RETRY_DELAY_MS";
pub const ENV_READY_TIMEOUT_MS: &str = "COURIER_READY_TIMEOUT_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "COURIER_SHUTDOWN_TIMEOUT_MS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Request worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Thread name, also used as the `worker` field in logs
    pub name: String,
    /// Server every job talks to
    pub endpoint: EndpointServer,
    /// Credential handed to the connector; the worker refuses to start without one
    pub auth_token: Option<String>,
    /// Delay applied when a failed job is requeued
    pub retry_delay: Duration,
    /// Upper bound for `push` waiting on a worker that is not running yet
    pub ready_timeout: Duration,
    /// Upper bound for `shutdown` waiting on the worker thread
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "request-worker".to_string(),
            endpoint: EndpointServer::default(),
            auth_token: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("retry_delay", &self.retry_delay)
            .field("ready_timeout", &self.ready_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointServer) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Build a config from `COURIER_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_NAME).filter(|v| !v.trim().is_empty()) {
            config.name = name;
        }

        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            config.endpoint = endpoint.parse().map_err(|e| ConfigError::Invalid {
                var: ENV_ENDPOINT,
                reason: format!("{e}"),
            })?;
        }

        config.auth_token = lookup(ENV_AUTH_TOKEN).filter(|v| !v.is_empty());

        if let Some(d) = millis(&lookup, ENV_RETRY_DELAY_MS)? {
            config.retry_delay = d;
        }
        if let Some(d) = millis(&lookup, ENV_READY_TIMEOUT_MS)? {
            config.ready_timeout = d;
        }
        if let Some(d) = millis(&lookup, ENV_SHUTDOWN_TIMEOUT_MS)? {
            config.shutdown_timeout = d;
        }

        Ok(config)
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("{raw:?}: {e}"),
            }),
    }
}
