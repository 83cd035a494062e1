//! Coordinator state machine
//!
//! Dispatches every protocol request against the roster, the per-worker mailboxes
//! and the captured final result.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_core::{
    Error, FinalResult, Message, NodeId, RequestType, Result, Roster, RosterHandle, Transport,
    WorkerSnapshot,
};

use crate::http_api::StatusResponse;
use crate::middleware::RequestMetrics;

/// Diagnostic printed when the run ends without a finished report
pub const NO_RESULT_DIAGNOSTIC: &str = "final result not captured";

/// Coordinator service
#[derive(Clone)]
pub struct CoordinatorService {
    /// Roster and mailboxes
    roster: RosterHandle,

    /// First reported result of the run
    final_result: Arc<OnceLock<FinalResult>>,

    /// Flips to true once the run is complete
    done_tx: Arc<watch::Sender<bool>>,

    /// Request accounting
    metrics: Arc<RequestMetrics>,

    /// Identifier of this coordinator run
    run_id: Uuid,

    /// Server start time for uptime tracking
    start_time: Instant,
}

impl CoordinatorService {
    /// Create a coordinator with an empty roster
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            roster: Arc::new(Roster::new()),
            final_result: Arc::new(OnceLock::new()),
            done_tx: Arc::new(done_tx),
            metrics: Arc::new(RequestMetrics::new()),
            run_id: Uuid::new_v4(),
            start_time: Instant::now(),
        }
    }

    pub fn roster(&self) -> &RosterHandle {
        &self.roster
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether the run is complete
    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// The captured result, if any worker finished
    pub fn final_result(&self) -> Option<FinalResult> {
        self.final_result.get().cloned()
    }

    /// Text printed at shutdown
    pub fn final_report(&self) -> String {
        match self.final_result.get() {
            Some(result) => result.to_string(),
            None => NO_RESULT_DIAGNOSTIC.to_string(),
        }
    }

    /// Resolve once the run is complete
    pub async fn wait_until_done(&self) {
        let mut done_rx = self.done_tx.subscribe();
        let _ = done_rx.wait_for(|done| *done).await;
    }

    /// Handle one request envelope and produce its reply list
    pub fn handle(&self, request: Message) -> Result<Vec<Message>> {
        let key = RequestMetrics::key(&request.request_type).to_string();
        let request_type = request.request_type.clone();
        let sender_id = request.sender_id;
        let started = Instant::now();
        self.metrics.record_request(&key);

        let result = self.dispatch(request);

        self.metrics
            .record_latency(&key, started.elapsed().as_micros() as u64);
        if let Err(e) = &result {
            self.metrics.record_error(&key);
            warn!(
                request_type = %request_type,
                sender_id = sender_id,
                error = %e,
                "Request rejected"
            );
        }
        result
    }

    fn dispatch(&self, request: Message) -> Result<Vec<Message>> {
        Self::validate_kind(&request)?;

        if request.request_type == RequestType::Register {
            let id = self.roster.register();
            return Ok(vec![Message::id_reply(id)]);
        }

        let sender = self.validate_sender(&request)?;
        match request.request_type {
            RequestType::Unregister => {
                let done = self.roster.mark_stopped(sender, None)?;
                info!(node_id = sender, "Worker unregistered");
                self.update_done(done);
                Ok(vec![Message::finished_ack(sender)])
            }
            RequestType::Ping => {
                let node = self.roster.check_in(sender)?;
                debug!(node_id = sender, done = node.is_done, "Ping");
                Ok(vec![Message::pong(sender, !node.is_done)])
            }
            RequestType::Crash => {
                warn!(node_id = sender, report = %request.body, "Crash reported");
                let done = self.roster.mark_stopped(sender, Some(request.body))?;
                self.update_done(done);
                Ok(vec![Message::pong(sender, true)])
            }
            RequestType::Finished => {
                let captured = self.capture_result(request.body);
                info!(node_id = sender, captured = captured, "Finish received");
                let done = self.roster.finish_all();
                self.update_done(done);
                Ok(vec![Message::finished_ack(sender)])
            }
            RequestType::Broadcast => {
                let relay = Message {
                    sender_id: sender,
                    ..request
                };
                let copies = self.roster.broadcast(sender, &relay);
                debug!(node_id = sender, copies = copies, "Broadcast queued");
                Ok(vec![Message::pong(sender, true)])
            }
            RequestType::Unicast => {
                let receiver = request.receiver_id;
                let relay = Message {
                    sender_id: sender,
                    ..request
                };
                self.roster.deliver(receiver, relay)?;
                debug!(node_id = sender, receiver_id = receiver, "Unicast queued");
                Ok(vec![Message::pong(sender, true)])
            }
            RequestType::CheckMessages => {
                let mail = self.roster.drain(sender)?;
                debug!(node_id = sender, count = mail.len(), "Mailbox drained");
                if mail.is_empty() {
                    Ok(vec![Message::no_mail(sender)])
                } else {
                    Ok(mail)
                }
            }
            ref other => Err(Error::violation(
                other.as_str(),
                sender,
                "request type is not handled by the coordinator",
            )),
        }
    }

    /// Reject reply-only and unknown types and envelopes of the wrong kind
    fn validate_kind(request: &Message) -> Result<()> {
        let request_type = &request.request_type;
        if !request_type.is_request() {
            return Err(Error::violation(
                request_type.as_str(),
                request.sender_id,
                "not a request type",
            ));
        }
        match request_type.kind() {
            Some(kind) if kind == request.message_type => Ok(()),
            expected => Err(Error::violation(
                request_type.as_str(),
                request.sender_id,
                format!(
                    "expected {:?} envelope, got {:?}",
                    expected, request.message_type
                ),
            )),
        }
    }

    /// Every request but register must come from a registered worker
    fn validate_sender(&self, request: &Message) -> Result<NodeId> {
        if self.roster.is_worker(request.sender_id) {
            Ok(request.sender_id)
        } else {
            Err(Error::violation(
                request.request_type.as_str(),
                request.sender_id,
                "sender is not registered",
            ))
        }
    }

    /// Keep only the first reported result; returns true if this one was kept
    fn capture_result(&self, body: serde_json::Value) -> bool {
        let mut captured = false;
        self.final_result.get_or_init(|| {
            captured = true;
            FinalResult::from_body(body)
        });
        captured
    }

    fn update_done(&self, done: bool) {
        if done && !self.is_done() {
            info!(
                running = self.roster.running_count(),
                "All workers stopped, run complete"
            );
            self.done_tx.send_replace(true);
        }
    }

    /// Snapshot of the workers for the status endpoint
    pub fn workers_for_api(&self) -> Vec<WorkerSnapshot> {
        self.roster.snapshot()
    }

    /// Full status for the status endpoint
    pub fn status_for_api(&self) -> StatusResponse {
        StatusResponse {
            run_id: self.run_id.to_string(),
            uptime: self.uptime_secs(),
            done: self.is_done(),
            running_nodes: self.roster.running_count(),
            final_result: self.final_result(),
            workers: self.workers_for_api(),
            requests: self.metrics.summary(),
        }
    }
}

impl Default for CoordinatorService {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process transport: requests are dispatched directly, without HTTP
#[async_trait]
impl Transport for CoordinatorService {
    async fn exchange(&self, request: Message) -> Result<Vec<Message>> {
        self.handle(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{MessageType, COORDINATOR_ID};
    use serde_json::json;

    fn register(service: &CoordinatorService) -> NodeId {
        let replies = service.handle(Message::register()).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].request_type, RequestType::Id);
        replies[0].body_as_id("register").unwrap()
    }

    fn ack(service: &CoordinatorService, request: Message) -> bool {
        let replies = service.handle(request).unwrap();
        assert_eq!(replies.len(), 1);
        replies[0].body.as_bool().unwrap()
    }

    #[test]
    fn test_register_assigns_dense_ids() {
        let service = CoordinatorService::new();
        assert_eq!(register(&service), 1);
        assert_eq!(register(&service), 2);
        assert_eq!(register(&service), 3);
        assert_eq!(service.roster().worker_count(), 3);
    }

    #[test]
    fn test_unregister_all_completes_run() {
        let service = CoordinatorService::new();
        let ids: Vec<_> = (0..4).map(|_| register(&service)).collect();

        for (i, id) in ids.iter().enumerate() {
            assert!(!service.is_done());
            assert!(ack(&service, Message::unregister(*id)));
            assert_eq!(service.is_done(), i == ids.len() - 1);
        }
        assert_eq!(service.final_report(), NO_RESULT_DIAGNOSTIC);
    }

    #[test]
    fn test_broadcast_reaches_every_other_worker_once() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);
        let c = register(&service);

        assert!(ack(&service, Message::broadcast(a, json!({"x": 1}))));

        for target in [b, c] {
            let mail = service.handle(Message::check_messages(target)).unwrap();
            assert_eq!(mail.len(), 1);
            assert_eq!(mail[0].body, json!({"x": 1}));
            assert_eq!(mail[0].sender_id, a);
            assert_eq!(mail[0].request_type, RequestType::Broadcast);

            let again = service.handle(Message::check_messages(target)).unwrap();
            assert!(again[0].is_no_mail());
        }

        let own = service.handle(Message::check_messages(a)).unwrap();
        assert!(own[0].is_no_mail());
    }

    #[test]
    fn test_broadcast_reaches_departed_worker() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);
        let c = register(&service);
        assert!(ack(&service, Message::unregister(c)));

        assert!(ack(&service, Message::broadcast(a, json!({"x": 1}))));
        assert_eq!(service.roster().pending(c), 1);
        assert_eq!(service.roster().pending(b), 1);

        let mail = service.handle(Message::check_messages(c)).unwrap();
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].body, json!({"x": 1}));
        assert_eq!(mail[0].sender_id, a);
        assert!(!service.roster().node(c).unwrap().is_running);
    }

    #[test]
    fn test_unicast_only_reaches_receiver() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);
        let c = register(&service);

        assert!(ack(&service, Message::unicast(a, b, json!("lemma-7"))));

        for other in [a, c] {
            let mail = service.handle(Message::check_messages(other)).unwrap();
            assert_eq!(mail, vec![Message::no_mail(other)]);
        }
        let mail = service.handle(Message::check_messages(b)).unwrap();
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].body, json!("lemma-7"));
    }

    #[test]
    fn test_unicast_to_unknown_node_is_address_error() {
        let service = CoordinatorService::new();
        let a = register(&service);

        for receiver in [COORDINATOR_ID, 2, -4] {
            let err = service
                .handle(Message::unicast(a, receiver, json!(1)))
                .unwrap_err();
            assert!(matches!(err, Error::UnknownNode { .. }));
        }
        assert_eq!(service.metrics().get_error_count("unicast"), 3);
    }

    #[test]
    fn test_empty_check_has_no_side_effects() {
        let service = CoordinatorService::new();
        let a = register(&service);

        for _ in 0..3 {
            let replies = service.handle(Message::check_messages(a)).unwrap();
            assert_eq!(replies.len(), 1);
            assert!(replies[0].is_no_mail());
        }
        assert!(service.roster().node(a).unwrap().is_running);
        assert!(!service.is_done());
    }

    #[test]
    fn test_first_finished_result_wins() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);

        assert!(ack(&service, Message::finished(b, json!({"status": "ok"}))));
        assert!(ack(&service, Message::finished(a, json!({"status": "bug"}))));

        let result = service.final_result().unwrap();
        assert_eq!(result.get("status"), Some(&json!("ok")));
        assert_eq!(service.final_report(), "status: ok");
    }

    #[test]
    fn test_finished_marks_workers_done_and_ping_reports_it() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);

        assert!(ack(&service, Message::ping(a)));
        assert!(ack(&service, Message::finished(b, json!({"status": "ok"}))));
        assert!(!ack(&service, Message::ping(a)));
        assert!(!ack(&service, Message::ping(b)));

        // Both workers are still running, so the run is not over yet
        assert!(!service.is_done());
        ack(&service, Message::unregister(a));
        ack(&service, Message::unregister(b));
        assert!(service.is_done());
    }

    #[test]
    fn test_crash_only_ends_run_for_last_worker() {
        let service = CoordinatorService::new();
        let a = register(&service);
        let b = register(&service);

        let report = json!("System.Exception: prover timed out");
        assert!(ack(&service, Message::crash(a, report.clone())));
        assert!(!service.roster().node(a).unwrap().is_running);
        assert_eq!(service.roster().crash_report(a), Some(report));
        assert!(!service.is_done());

        // Crash does not mark anyone done
        assert!(ack(&service, Message::ping(b)));

        assert!(ack(&service, Message::crash(b, json!({"error": "oom"}))));
        assert!(service.is_done());
    }

    #[test]
    fn test_unregistered_sender_is_protocol_violation() {
        let service = CoordinatorService::new();
        register(&service);

        let err = service.handle(Message::ping(5)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));

        let err = service.handle(Message::check_messages(COORDINATOR_ID)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn test_malformed_requests_are_protocol_violations() {
        let service = CoordinatorService::new();
        let a = register(&service);

        let unknown = Message::new(RequestType::Other("gossip".to_string()), a, json!(null));
        let reply_type = Message::pong(a, true);
        let mut wrong_kind = Message::broadcast(a, json!(1));
        wrong_kind.message_type = MessageType::Logistic;
        let mut no_reply = Message::ping(a);
        no_reply.message_type = MessageType::NoReply;

        for request in [unknown, reply_type, wrong_kind, no_reply] {
            let err = service.handle(request).unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation { .. }), "{err}");
        }
        assert_eq!(service.metrics().get_error_count("unknown"), 1);
        assert_eq!(service.roster().worker_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_until_done_resolves() {
        let service = CoordinatorService::new();
        let a = register(&service);

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.wait_until_done().await })
        };
        service.exchange(Message::unregister(a)).await.unwrap();
        waiter.await.unwrap();
        assert!(service.is_done());
    }

    #[test]
    fn test_status_for_api() {
        let service = CoordinatorService::new();
        let a = register(&service);
        service.handle(Message::ping(a)).unwrap();

        let status = service.status_for_api();
        assert!(!status.done);
        assert_eq!(status.running_nodes, 2);
        assert_eq!(status.workers.len(), 1);
        assert_eq!(status.requests["ping"].requests, 1);
        assert!(status.final_result.is_none());
    }
}
