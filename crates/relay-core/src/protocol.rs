//! Wire protocol shared by the coordinator and its workers
//!
//! Every exchange carries exactly one [`Message`] from a worker to the coordinator
//! and a list of messages back. Envelopes are built fresh per call through the
//! factory functions on [`Message`]; nothing is shared between calls.

use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Error, NodeId, Result, COORDINATOR_ID, UNASSIGNED_ID};

/// Envelope kind.
///
/// Serialized by name; decoding also accepts the ordinals 0, 1 and 2.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Inter-worker traffic relayed through the coordinator
    Request,

    /// Lifecycle traffic between a worker and the coordinator
    Logistic,

    /// Reply suppressed by the coordinator
    NoReply,
}

impl MessageType {
    const NAMES: &'static [&'static str] = &["REQUEST", "LOGISTIC", "NOREPLY"];
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Name(String),
            Ordinal(u64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Name(name) => match name.as_str() {
                "REQUEST" => Ok(MessageType::Request),
                "LOGISTIC" => Ok(MessageType::Logistic),
                "NOREPLY" => Ok(MessageType::NoReply),
                other => Err(de::Error::unknown_variant(other, Self::NAMES)),
            },
            Wire::Ordinal(0) => Ok(MessageType::Request),
            Wire::Ordinal(1) => Ok(MessageType::Logistic),
            Wire::Ordinal(2) => Ok(MessageType::NoReply),
            Wire::Ordinal(n) => Err(de::Error::invalid_value(
                Unexpected::Unsigned(n),
                &"0, 1 or 2",
            )),
        }
    }
}

/// Closed vocabulary of request and reply types.
///
/// Unknown names are preserved in [`RequestType::Other`] so the coordinator can
/// reject them as protocol violations instead of failing to decode the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequestType {
    Register,
    Unregister,
    Ping,
    Crash,
    Finished,
    Broadcast,
    Unicast,
    CheckMessages,
    /// Reply carrying a freshly assigned id
    Id,
    /// Generic acknowledgement, also the "no mail" placeholder
    Pong,
    /// Acknowledgement of `finished` and `unregister`
    FinishedAck,
    Other(String),
}

impl RequestType {
    /// Every known request and reply type
    pub const KNOWN: [RequestType; 11] = [
        RequestType::Register,
        RequestType::Unregister,
        RequestType::Ping,
        RequestType::Crash,
        RequestType::Finished,
        RequestType::Broadcast,
        RequestType::Unicast,
        RequestType::CheckMessages,
        RequestType::Id,
        RequestType::Pong,
        RequestType::FinishedAck,
    ];

    /// Wire name of this type
    pub fn as_str(&self) -> &str {
        match self {
            RequestType::Register => "register",
            RequestType::Unregister => "unregister",
            RequestType::Ping => "ping",
            RequestType::Crash => "crash",
            RequestType::Finished => "finished",
            RequestType::Broadcast => "broadcast",
            RequestType::Unicast => "unicast",
            RequestType::CheckMessages => "checkMessages",
            RequestType::Id => "id",
            RequestType::Pong => "pong",
            RequestType::FinishedAck => "finishedAck",
            RequestType::Other(name) => name,
        }
    }

    /// Kind this type is bound to, or None for unknown names
    pub fn kind(&self) -> Option<MessageType> {
        match self {
            RequestType::Broadcast | RequestType::Unicast | RequestType::CheckMessages => {
                Some(MessageType::Request)
            }
            RequestType::Other(_) => None,
            _ => Some(MessageType::Logistic),
        }
    }

    /// Returns true if a worker may send this type to the coordinator
    pub fn is_request(&self) -> bool {
        !matches!(
            self,
            RequestType::Id | RequestType::Pong | RequestType::FinishedAck | RequestType::Other(_)
        )
    }
}

impl From<String> for RequestType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "register" => RequestType::Register,
            "unregister" => RequestType::Unregister,
            "ping" => RequestType::Ping,
            "crash" => RequestType::Crash,
            "finished" => RequestType::Finished,
            "broadcast" => RequestType::Broadcast,
            "unicast" => RequestType::Unicast,
            "checkMessages" => RequestType::CheckMessages,
            "id" => RequestType::Id,
            "pong" => RequestType::Pong,
            "finishedAck" => RequestType::FinishedAck,
            _ => RequestType::Other(name),
        }
    }
}

impl From<RequestType> for String {
    fn from(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_type: MessageType,

    pub request_type: RequestType,

    #[serde(default)]
    pub sender_id: NodeId,

    /// Only meaningful for unicast requests and coordinator replies
    #[serde(default)]
    pub receiver_id: NodeId,

    /// Opaque payload
    #[serde(default)]
    pub body: Value,
}

impl Message {
    /// Create an envelope of the kind bound to `request_type`
    pub fn new(request_type: RequestType, sender_id: NodeId, body: Value) -> Self {
        let message_type = request_type.kind().unwrap_or(MessageType::Request);
        Self {
            message_type,
            request_type,
            sender_id,
            receiver_id: COORDINATOR_ID,
            body,
        }
    }

    pub fn register() -> Self {
        Self::new(RequestType::Register, UNASSIGNED_ID, Value::Null)
    }

    pub fn unregister(sender_id: NodeId) -> Self {
        Self::new(RequestType::Unregister, sender_id, Value::Null)
    }

    pub fn ping(sender_id: NodeId) -> Self {
        Self::new(RequestType::Ping, sender_id, Value::Null)
    }

    pub fn crash(sender_id: NodeId, body: Value) -> Self {
        Self::new(RequestType::Crash, sender_id, body)
    }

    pub fn finished(sender_id: NodeId, body: Value) -> Self {
        Self::new(RequestType::Finished, sender_id, body)
    }

    pub fn broadcast(sender_id: NodeId, body: Value) -> Self {
        Self::new(RequestType::Broadcast, sender_id, body)
    }

    pub fn unicast(sender_id: NodeId, receiver_id: NodeId, body: Value) -> Self {
        Self {
            receiver_id,
            ..Self::new(RequestType::Unicast, sender_id, body)
        }
    }

    pub fn check_messages(sender_id: NodeId) -> Self {
        Self::new(RequestType::CheckMessages, sender_id, Value::Null)
    }

    /// Coordinator reply to a register request
    pub fn id_reply(assigned: NodeId) -> Self {
        Self::reply(RequestType::Id, assigned, Value::from(assigned))
    }

    /// Coordinator acknowledgement carrying a boolean
    pub fn pong(receiver_id: NodeId, value: bool) -> Self {
        Self::reply(RequestType::Pong, receiver_id, Value::Bool(value))
    }

    /// Coordinator acknowledgement of `finished` and `unregister`
    pub fn finished_ack(receiver_id: NodeId) -> Self {
        Self::reply(RequestType::FinishedAck, receiver_id, Value::Bool(true))
    }

    /// Placeholder returned by `checkMessages` when the mailbox is empty
    pub fn no_mail(receiver_id: NodeId) -> Self {
        Self::pong(receiver_id, true)
    }

    fn reply(request_type: RequestType, receiver_id: NodeId, body: Value) -> Self {
        Self {
            receiver_id,
            ..Self::new(request_type, COORDINATOR_ID, body)
        }
    }

    /// Returns true if this is the empty-mailbox placeholder
    pub fn is_no_mail(&self) -> bool {
        self.request_type == RequestType::Pong && self.sender_id == COORDINATOR_ID
    }

    /// Interpret the body as a boolean acknowledgement
    pub fn body_as_bool(&self, operation: &str) -> Result<bool> {
        self.body.as_bool().ok_or_else(|| Error::UnexpectedReply {
            operation: operation.to_string(),
            reason: format!("expected boolean body, got {}", self.body),
        })
    }

    /// Interpret the body as a node id
    pub fn body_as_id(&self, operation: &str) -> Result<NodeId> {
        self.body.as_i64().ok_or_else(|| Error::UnexpectedReply {
            operation: operation.to_string(),
            reason: format!("expected integer id, got {}", self.body),
        })
    }

    /// Serialize to the JSON wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse one envelope from the JSON wire form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse a reply list from the JSON wire form
    pub fn decode_reply(bytes: &[u8]) -> Result<Vec<Self>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of a request-level failure returned by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category, see [`Error::kind`]
    pub error: String,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Expect a reply list with exactly one element
pub fn single_reply(operation: &str, mut replies: Vec<Message>) -> Result<Message> {
    if replies.len() != 1 {
        return Err(Error::UnexpectedReply {
            operation: operation.to_string(),
            reason: format!("expected exactly one reply, got {}", replies.len()),
        });
    }
    Ok(replies.remove(0))
}
