//! Remote endpoint description.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default port used when an endpoint string omits one.
pub const DEFAULT_PORT: u16 = 5222;

/// The remote server all jobs talk to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointServer {
    host: String,
    port: u16,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint host is empty")]
    EmptyHost,
    #[error("invalid endpoint port: {0}")]
    InvalidPort(String),
}

impl EndpointServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for EndpointServer {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl core::fmt::Display for EndpointServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for EndpointServer {
    type Err = EndpointParseError;

    /// Parses `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost);
        }

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep: EndpointServer = "relay.example.org:443".parse().unwrap();
        assert_eq!(ep.host(), "relay.example.org");
        assert_eq!(ep.port(), 443);
        assert_eq!(ep.to_string(), "relay.example.org:443");
    }

    #[test]
    fn missing_port_uses_default() {
        let ep: EndpointServer = "relay.example.org".parse().unwrap();
        assert_eq!(ep.port(), DEFAULT_PORT);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            "".parse::<EndpointServer>(),
            Err(EndpointParseError::EmptyHost)
        );
        assert_eq!(
            ":80".parse::<EndpointServer>(),
            Err(EndpointParseError::EmptyHost)
        );
        assert!(matches!(
            "host:http".parse::<EndpointServer>(),
            Err(EndpointParseError::InvalidPort(_))
        ));
    }
}
