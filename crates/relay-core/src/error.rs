//! Error types for the relay coordination substrate

use thiserror::Error;

use crate::NodeId;

/// Result type alias using the relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by the coordinator and the worker-side communicator
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Protocol violation: {request_type} from node {sender_id}: {reason}")]
    ProtocolViolation {
        request_type: String,
        sender_id: NodeId,
        reason: String,
    },

    #[error("Unknown node: {node_id}")]
    UnknownNode { node_id: NodeId },

    // Client-side misuse
    #[error("Communicator is not registered; call register first")]
    NotRegistered,

    #[error("Communicator already registered as node {node_id}")]
    AlreadyRegistered { node_id: NodeId },

    #[error("Unexpected reply to {operation}: {reason}")]
    UnexpectedReply { operation: String, reason: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Coordinator rejected request ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: String,
        message: String,
    },

    // Worker job errors
    #[error("Worker job failed: {message}")]
    WorkerFailed { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Build a protocol violation for the given request
    pub fn violation(
        request_type: impl Into<String>,
        sender_id: NodeId,
        reason: impl Into<String>,
    ) -> Self {
        Error::ProtocolViolation {
            request_type: request_type.into(),
            sender_id,
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ProtocolViolation { .. } => "protocol_violation",
            Error::UnknownNode { .. } => "address_error",
            Error::NotRegistered | Error::AlreadyRegistered { .. } => "client_misuse",
            Error::UnexpectedReply { .. } => "unexpected_reply",
            Error::Transport { .. } | Error::Rejected { .. } => "transport_error",
            Error::WorkerFailed { .. } => "worker_failure",
            Error::InvalidConfig { .. } => "invalid_config",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Internal { .. } => "internal_error",
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Returns true if the failed request can never succeed as sent
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation { .. }
                | Error::UnknownNode { .. }
                | Error::NotRegistered
                | Error::InvalidConfig { .. }
                | Error::Internal { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err = Error::Transport {
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());

        let err = Error::violation("unicast", 7, "sender is not registered");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::UnknownNode { node_id: 9 }.is_fatal());
        assert!(Error::NotRegistered.is_fatal());

        let err = Error::Transport {
            message: "timed out".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::violation("bogus", 1, "unknown request type").kind(),
            "protocol_violation"
        );
        assert_eq!(Error::UnknownNode { node_id: 3 }.kind(), "address_error");

        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), "serialization_error");
    }
}
