//! Roster and mailbox bookkeeping owned by the coordinator
//!
//! Lock discipline: the node list lock is always taken before any mailbox entry,
//! and no mailbox guard is held while the node list lock is acquired.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Error, Message, NodeId, Result, COORDINATOR_ID};

/// Liveness flags of one participant in the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,

    /// Self-reported liveness
    pub is_running: bool,

    /// Whether the run no longer needs this node
    pub is_done: bool,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            is_running: true,
            is_done: false,
        }
    }

    pub fn finish(&mut self) {
        self.is_done = true;
    }
}

/// Coordinator-local record of a remote worker
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    mailbox: VecDeque<Message>,
    last_checkin: DateTime<Utc>,
    crash_report: Option<Value>,
}

impl WorkerRecord {
    pub fn new() -> Self {
        Self {
            mailbox: VecDeque::new(),
            last_checkin: Utc::now(),
            crash_report: None,
        }
    }

    pub fn check_in(&mut self) {
        self.last_checkin = Utc::now();
    }

    pub fn push(&mut self, message: Message) {
        self.mailbox.push_back(message);
    }

    /// Take every pending message in arrival order
    pub fn drain(&mut self) -> Vec<Message> {
        self.mailbox.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    pub fn last_checkin(&self) -> DateTime<Utc> {
        self.last_checkin
    }

    pub fn crash_report(&self) -> Option<&Value> {
        self.crash_report.as_ref()
    }
}

impl Default for WorkerRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: NodeId,
    pub is_running: bool,
    pub is_done: bool,
    pub pending_messages: usize,
    pub last_checkin: DateTime<Utc>,
    pub crash_report: Option<Value>,
}

/// Thread-safe roster of the coordinator and its workers.
///
/// Index 0 is the coordinator; workers follow in registration order and their
/// index is their id. Entries are never removed.
pub struct Roster {
    nodes: RwLock<Vec<Node>>,

    /// Mailboxes and checkin state, keyed by worker id
    workers: DashMap<NodeId, WorkerRecord>,
}

impl Roster {
    /// Create a roster holding only the coordinator
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(vec![Node::new(COORDINATOR_ID)]),
            workers: DashMap::new(),
        }
    }

    /// Append a new running worker and return its id
    pub fn register(&self) -> NodeId {
        let mut nodes = self.nodes.write();
        let id = nodes.len() as NodeId;
        self.workers.insert(id, WorkerRecord::new());
        nodes.push(Node::new(id));

        info!(node_id = id, "Worker registered");
        id
    }

    /// Total nodes, coordinator included
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if no worker ever registered
    pub fn is_empty(&self) -> bool {
        self.worker_count() == 0
    }

    pub fn worker_count(&self) -> usize {
        self.len() - 1
    }

    /// Get a copy of a node's flags
    pub fn node(&self, id: NodeId) -> Option<Node> {
        let nodes = self.nodes.read();
        index_of(&nodes, id).map(|idx| nodes[idx])
    }

    /// Returns true if `id` belongs to a registered worker
    pub fn is_worker(&self, id: NodeId) -> bool {
        id != COORDINATOR_ID && self.node(id).is_some()
    }

    /// Refresh a worker's checkin time and return its current flags
    pub fn check_in(&self, id: NodeId) -> Result<Node> {
        let node = self.worker_node(id)?;
        if let Some(mut record) = self.workers.get_mut(&id) {
            record.check_in();
        }
        Ok(node)
    }

    /// Mark a worker as no longer running, keeping an optional crash report.
    ///
    /// Returns the recomputed done flag of the coordinator.
    pub fn mark_stopped(&self, id: NodeId, crash_report: Option<Value>) -> Result<bool> {
        let mut nodes = self.nodes.write();
        let idx = worker_index(&nodes, id)?;
        nodes[idx].is_running = false;

        if let Some(report) = crash_report {
            if let Some(mut record) = self.workers.get_mut(&id) {
                record.crash_report = Some(report);
            }
        }

        Ok(recompute_done(&mut nodes))
    }

    /// Mark every node done, then recompute the coordinator's done flag
    pub fn finish_all(&self) -> bool {
        let mut nodes = self.nodes.write();
        for node in nodes.iter_mut() {
            node.finish();
        }
        recompute_done(&mut nodes)
    }

    /// Whether the coordinator considers the run complete
    pub fn is_done(&self) -> bool {
        self.nodes.read()[0].is_done
    }

    /// Number of running nodes, coordinator included
    pub fn running_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_running).count()
    }

    /// Queue a message into one worker's mailbox
    pub fn deliver(&self, id: NodeId, message: Message) -> Result<()> {
        let mut record = self
            .workers
            .get_mut(&id)
            .ok_or(Error::UnknownNode { node_id: id })?;
        record.push(message);
        debug!(node_id = id, pending = record.pending(), "Message queued");
        Ok(())
    }

    /// Queue a copy of a message into every worker except `from`.
    ///
    /// Returns the number of copies queued.
    pub fn broadcast(&self, from: NodeId, message: &Message) -> usize {
        let nodes = self.nodes.read();
        let mut copies = 0;
        for node in nodes.iter().skip(1).filter(|n| n.id != from) {
            if let Some(mut record) = self.workers.get_mut(&node.id) {
                record.push(message.clone());
                copies += 1;
            }
        }
        copies
    }

    /// Atomically take every pending message of a worker
    pub fn drain(&self, id: NodeId) -> Result<Vec<Message>> {
        let mut record = self
            .workers
            .get_mut(&id)
            .ok_or(Error::UnknownNode { node_id: id })?;
        Ok(record.drain())
    }

    /// Number of messages waiting for a worker
    pub fn pending(&self, id: NodeId) -> usize {
        self.workers.get(&id).map(|r| r.pending()).unwrap_or(0)
    }

    /// Crash report stored for a worker, if any
    pub fn crash_report(&self, id: NodeId) -> Option<Value> {
        self.workers
            .get(&id)
            .and_then(|r| r.crash_report().cloned())
    }

    /// Snapshot every worker in id order
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let nodes: Vec<Node> = self.nodes.read().iter().skip(1).copied().collect();
        nodes
            .into_iter()
            .filter_map(|node| {
                self.workers.get(&node.id).map(|record| WorkerSnapshot {
                    id: node.id,
                    is_running: node.is_running,
                    is_done: node.is_done,
                    pending_messages: record.pending(),
                    last_checkin: record.last_checkin(),
                    crash_report: record.crash_report().cloned(),
                })
            })
            .collect()
    }

    fn worker_node(&self, id: NodeId) -> Result<Node> {
        let nodes = self.nodes.read();
        worker_index(&nodes, id).map(|idx| nodes[idx])
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to the roster
pub type RosterHandle = Arc<Roster>;

fn index_of(nodes: &[Node], id: NodeId) -> Option<usize> {
    usize::try_from(id).ok().filter(|idx| *idx < nodes.len())
}

fn worker_index(nodes: &[Node], id: NodeId) -> Result<usize> {
    index_of(nodes, id)
        .filter(|idx| *idx != 0)
        .ok_or(Error::UnknownNode { node_id: id })
}

fn recompute_done(nodes: &mut [Node]) -> bool {
    let running = nodes.iter().filter(|n| n.is_running).count();
    let done = running <= 1;
    nodes[0].is_done = done;
    done
}
