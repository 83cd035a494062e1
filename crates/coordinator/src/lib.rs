//! Coordinator for the relay message-passing substrate
//!
//! This crate provides the long-lived coordinator process that owns:
//! - **Roster**: worker registration, liveness flags and crash reports
//! - **Mailboxes**: broadcast and unicast delivery, drained on poll
//! - **Run completion**: the first reported result, printed at shutdown
//!
//! # Example
//!
//! ```ignore
//! use coordinator::{CoordinatorServer, CoordinatorService};
//!
//! #[tokio::main]
//! async fn main() -> relay_core::Result<()> {
//!     let server = CoordinatorServer::new(CoordinatorService::new());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod http_api;
pub mod launcher;
pub mod middleware;
pub mod server;
pub mod service;

// Re-export main types
pub use http_api::{create_router, StatusResponse};
pub use launcher::WorkerLauncher;
pub use middleware::{RequestMetrics, RequestStats};
pub use server::{CoordinatorServer, ServerConfig};
pub use service::{CoordinatorService, NO_RESULT_DIAGNOSTIC};
