//! Worker-side client for the relay coordinator
//!
//! - [`Communicator`]: typed protocol client bound to one worker id
//! - [`HttpTransport`]: reqwest transport to the coordinator endpoint
//! - [`WorkerDriver`]: runs one job under coordinator supervision

pub mod communicator;
pub mod driver;
pub mod http;

pub use communicator::Communicator;
pub use driver::{DriverConfig, JobOutcome, WorkerDriver};
pub use http::HttpTransport;

/// Communicator over HTTP, as used by worker processes
pub type HttpCommunicator = Communicator<HttpTransport>;
