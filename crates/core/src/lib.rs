//! Primitives shared by the courier crates.
//!
//! Nothing in here knows about threads or queues; it only names things
//! (jobs, endpoints) and describes how talking to the remote service can fail.

pub mod endpoint;
pub mod error;
pub mod id;

pub use endpoint::{EndpointParseError, EndpointServer};
pub use error::{TransportError, TransportResult};
pub use id::JobId;
