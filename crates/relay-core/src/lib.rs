//! Relay Core - Foundation for the coordinator/worker message-passing substrate
//!
//! Provides the wire protocol, roster and mailbox bookkeeping, error handling,
//! configuration, and the transport seam shared by the coordinator and the
//! worker-side communicator.

pub mod config;
pub mod error;
pub mod protocol;
pub mod roster;
pub mod transport;
pub mod types;

pub use config::{CommunicatorConfig, CoordinatorConfig, LaunchConfig, RelayConfig};
pub use error::{Error, Result};
pub use protocol::{single_reply, ErrorResponse, Message, MessageType, RequestType};
pub use roster::{Node, Roster, RosterHandle, WorkerRecord, WorkerSnapshot};
pub use transport::Transport;
pub use types::*;
