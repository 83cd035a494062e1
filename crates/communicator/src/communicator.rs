//! Worker-side client of the coordinator protocol
//!
//! A [`Communicator`] owns the worker's assigned id and turns each protocol
//! operation into exactly one request/reply exchange over its [`Transport`].

use serde_json::Value;
use tracing::{debug, info, warn};

use relay_core::{single_reply, Error, Message, NodeId, RequestType, Result, Transport};

/// Typed client for one worker
pub struct Communicator<T: Transport> {
    transport: T,
    id: Option<NodeId>,
}

impl<T: Transport> Communicator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            id: None,
        }
    }

    /// Bind to an id assigned to this worker by an earlier `register`.
    ///
    /// Used by jobs launched with their driver's id; `register` is rejected.
    pub fn with_id(transport: T, id: NodeId) -> Self {
        Self {
            transport,
            id: Some(id),
        }
    }

    /// Assigned id, once registered
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn require_id(&self) -> Result<NodeId> {
        self.id.ok_or(Error::NotRegistered)
    }

    /// Send a request and expect a single reply of `expected` type
    async fn call(&self, request: Message, expected: RequestType) -> Result<Message> {
        let operation = request.request_type.to_string();
        let replies = self.transport.exchange(request).await?;
        let reply = single_reply(&operation, replies)?;
        if reply.request_type != expected {
            return Err(Error::UnexpectedReply {
                operation,
                reason: format!("expected {} reply, got {}", expected, reply.request_type),
            });
        }
        Ok(reply)
    }

    /// Obtain an id from the coordinator; may only be called once
    pub async fn register(&mut self) -> Result<NodeId> {
        if let Some(node_id) = self.id {
            return Err(Error::AlreadyRegistered { node_id });
        }
        let reply = self.call(Message::register(), RequestType::Id).await?;
        let id = reply.body_as_id("register")?;
        self.id = Some(id);
        info!(node_id = id, "Registered with coordinator");
        Ok(id)
    }

    /// Tell the coordinator this worker has stopped
    pub async fn unregister(&self) -> Result<()> {
        let id = self.require_id()?;
        let reply = self
            .call(Message::unregister(id), RequestType::FinishedAck)
            .await?;
        reply.body_as_bool("unregister")?;
        info!(node_id = id, "Unregistered from coordinator");
        Ok(())
    }

    /// Heartbeat; false once the coordinator considers this worker done
    pub async fn ping(&self) -> Result<bool> {
        let id = self.require_id()?;
        let reply = self.call(Message::ping(id), RequestType::Pong).await?;
        let keep_going = reply.body_as_bool("ping")?;
        debug!(node_id = id, keep_going = keep_going, "Ping");
        Ok(keep_going)
    }

    /// Report the run's result
    pub async fn report_finished(&self, body: Value) -> Result<()> {
        let id = self.require_id()?;
        let reply = self
            .call(Message::finished(id, body), RequestType::FinishedAck)
            .await?;
        reply.body_as_bool("finished")?;
        info!(node_id = id, "Reported finished");
        Ok(())
    }

    /// Report a local fatal error
    pub async fn report_crash(&self, body: Value) -> Result<()> {
        let id = self.require_id()?;
        warn!(node_id = id, report = %body, "Reporting crash");
        let reply = self
            .call(Message::crash(id, body), RequestType::Pong)
            .await?;
        reply.body_as_bool("crash")?;
        Ok(())
    }

    /// Queue `body` for every other worker
    pub async fn broadcast(&self, body: Value) -> Result<()> {
        let id = self.require_id()?;
        let reply = self
            .call(Message::broadcast(id, body), RequestType::Pong)
            .await?;
        reply.body_as_bool("broadcast")?;
        Ok(())
    }

    /// Queue `body` for one worker
    pub async fn unicast(&self, receiver_id: NodeId, body: Value) -> Result<()> {
        let id = self.require_id()?;
        let reply = self
            .call(Message::unicast(id, receiver_id, body), RequestType::Pong)
            .await?;
        reply.body_as_bool("unicast")?;
        Ok(())
    }

    /// Drain this worker's mailbox, returning the full envelopes
    pub async fn check_mail(&self) -> Result<Vec<Message>> {
        let id = self.require_id()?;
        let replies = self
            .transport
            .exchange(Message::check_messages(id))
            .await?;

        if replies.is_empty() {
            return Err(Error::UnexpectedReply {
                operation: RequestType::CheckMessages.to_string(),
                reason: "empty reply list".to_string(),
            });
        }
        if replies.len() == 1 && replies[0].is_no_mail() {
            return Ok(Vec::new());
        }
        if let Some(bad) = replies
            .iter()
            .find(|m| !matches!(m.request_type, RequestType::Broadcast | RequestType::Unicast))
        {
            return Err(Error::UnexpectedReply {
                operation: RequestType::CheckMessages.to_string(),
                reason: format!("unexpected {} in mailbox", bad.request_type),
            });
        }
        debug!(node_id = id, count = replies.len(), "Mail received");
        Ok(replies)
    }

    /// Drain this worker's mailbox, returning only the bodies
    pub async fn check_messages(&self) -> Result<Vec<Value>> {
        Ok(self
            .check_mail()
            .await?
            .into_iter()
            .map(|message| message.body)
            .collect())
    }
}
