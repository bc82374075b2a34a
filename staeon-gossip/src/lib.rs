//! HTTP fan-out gossip. spec.md §4/§6 calls for push-style propagation of
//! transactions, rejections, epoch-hash pushes, and penalty accusations to
//! every known peer over plain HTTP POST — no pubsub mesh. A bounded worker
//! pool drains a shared queue; when the queue is full the oldest pending
//! message is dropped rather than blocking the caller, and an
//! at-most-once filter keyed on `(object_id, peer_domain)` keeps a given
//! peer from being re-sent the same object.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use staeon_core::{EpochHashPush, NodePenalization, PenaltyVote, Rejection, Transaction};

pub const TRANSACTION_PATH: &str = "/staeon/transaction/";
pub const REJECTION_PATH: &str = "/staeon/rejections/";
pub const CONSENSUS_PUSH_PATH: &str = "/staeon/consensus/push";
pub const CONSENSUS_PENALTY_PATH: &str = "/staeon/consensus/penalty";
pub const CONSENSUS_VOTE_PATH: &str = "/staeon/consensus/vote";

#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            request_timeout: Duration::from_secs(5),
        }
    }
}

struct GossipMessage {
    object_id: String,
    peer_domain: String,
    path: String,
    /// `application/x-www-form-urlencoded` fields, matching whatever `Form<_>`
    /// extractor the receiving `staeon-rpc` handler for `path` uses (spec.md
    /// §6's HTTP surface is form-encoded, not raw JSON bodies).
    form: Vec<(String, String)>,
}

struct Inner {
    queue: Mutex<VecDeque<GossipMessage>>,
    seen: Mutex<HashSet<(String, String)>>,
    notify: Notify,
    client: reqwest::Client,
    capacity: usize,
}

/// A handle to the background worker pool. Cloning shares the same queue.
#[derive(Clone)]
pub struct GossipService {
    inner: Arc<Inner>,
}

impl GossipService {
    pub fn new(config: GossipConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds with static config");
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            seen: Mutex::new(HashSet::new()),
            notify: Notify::new(),
            client,
            capacity: config.queue_capacity,
        });
        for worker in 0..config.worker_count {
            let inner = inner.clone();
            tokio::spawn(async move {
                debug!(worker, "gossip worker started");
                worker_loop(inner).await;
            });
        }
        Self { inner }
    }

    /// Enqueues `form` to be POSTed to `path` on every domain in `peers`,
    /// skipping any peer this `object_id` was already sent to.
    fn enqueue(&self, object_id: &str, path: &str, form: Vec<(String, String)>, peers: &[String]) {
        let mut seen = self.inner.seen.lock();
        let mut queue = self.inner.queue.lock();
        for peer in peers {
            let key = (object_id.to_string(), peer.clone());
            if !seen.insert(key) {
                continue;
            }
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
            }
            queue.push_back(GossipMessage {
                object_id: object_id.to_string(),
                peer_domain: peer.clone(),
                path: path.to_string(),
                form: form.clone(),
            });
        }
        drop(queue);
        self.inner.notify.notify_waiters();
    }

    /// Wraps `value` as the single `obj` form field the receiving
    /// `consensus/push`/`consensus/penalty`/`consensus/vote` handlers expect.
    fn enqueue_as_obj<T: serde::Serialize>(&self, object_id: &str, path: &str, value: &T, peers: &[String]) {
        match serde_json::to_string(value) {
            Ok(obj) => self.enqueue(object_id, path, vec![("obj".to_string(), obj)], peers),
            Err(e) => warn!("failed to serialize gossip payload for {path}: {e}"),
        }
    }

    /// `authorization` is a JSON-encoded `staeon_consensus::mempool::TxAuthorization`
    /// (spec.md supplement): set when this node already validated `tx`
    /// against its own ledger state and wants to spare the receiver a
    /// redundant `balance_at` recheck.
    pub fn broadcast_transaction(&self, tx: &Transaction, authorization: Option<&str>, peers: &[String]) {
        match serde_json::to_string(tx) {
            Ok(json) => {
                let mut form = vec![("tx".to_string(), json)];
                if let Some(authorization) = authorization {
                    form.push(("authorization".to_string(), authorization.to_string()));
                }
                self.enqueue(&tx.txid.to_hex(), TRANSACTION_PATH, form, peers)
            }
            Err(e) => warn!("failed to serialize gossip transaction: {e}"),
        }
    }

    pub fn broadcast_rejection(&self, rejection: &Rejection, peers: &[String]) {
        let object_id = format!("{}:{}", rejection.txid.to_hex(), rejection.rejecting_domain);
        let form = vec![
            ("domain".to_string(), rejection.rejecting_domain.clone()),
            ("txid".to_string(), rejection.txid.to_hex()),
            ("signature".to_string(), rejection.signature.clone()),
        ];
        self.enqueue(&object_id, REJECTION_PATH, form, peers);
    }

    pub fn broadcast_push(&self, push: &EpochHashPush, peers: &[String]) {
        let object_id = format!("{}:{}:{}", push.epoch, push.from_domain, push.to_domain);
        self.enqueue_as_obj(&object_id, CONSENSUS_PUSH_PATH, push, peers);
    }

    pub fn broadcast_penalization(&self, penalization: &NodePenalization, peers: &[String]) {
        let object_id = format!(
            "{}:{}:{}",
            penalization.epoch, penalization.accuser_domain, penalization.accused_domain
        );
        self.enqueue_as_obj(&object_id, CONSENSUS_PENALTY_PATH, penalization, peers);
    }

    pub fn broadcast_penalty_vote(&self, vote: &PenaltyVote, peers: &[String]) {
        let object_id = format!(
            "{}:{}:{}",
            vote.epoch, vote.penalized_peer, vote.voting_peer
        );
        self.enqueue_as_obj(&object_id, CONSENSUS_VOTE_PATH, vote, peers);
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        let msg = loop {
            if let Some(msg) = inner.queue.lock().pop_front() {
                break msg;
            }
            inner.notify.notified().await;
        };
        send(&inner, msg).await;
    }
}

async fn send(inner: &Inner, msg: GossipMessage) {
    let url = format!("https://{}{}", msg.peer_domain, msg.path);
    match inner.client.post(&url).form(&msg.form).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(peer = %msg.peer_domain, path = %msg.path, "gossip delivered");
        }
        Ok(resp) => {
            warn!(peer = %msg.peer_domain, path = %msg.path, status = %resp.status(), "gossip rejected");
        }
        Err(e) => {
            warn!(peer = %msg.peer_domain, path = %msg.path, error = %e, "gossip delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_once_filter_skips_repeat_peer() {
        let service = GossipService::new(GossipConfig {
            worker_count: 0,
            ..GossipConfig::default()
        });
        let peers = vec!["a.example".to_string()];
        service.enqueue("obj-1", "/x", vec![], &peers);
        service.enqueue("obj-1", "/x", vec![], &peers);
        assert_eq!(service.queue_len(), 1);
    }

    #[test]
    fn backpressure_drops_oldest_when_full() {
        let service = GossipService::new(GossipConfig {
            worker_count: 0,
            queue_capacity: 2,
            ..GossipConfig::default()
        });
        let peers = vec!["a.example".to_string()];
        service.enqueue("obj-1", "/x", vec![], &peers);
        service.enqueue("obj-2", "/x", vec![], &peers);
        service.enqueue("obj-3", "/x", vec![], &peers);
        assert_eq!(service.queue_len(), 2);
        let remaining: Vec<_> = service
            .inner
            .queue
            .lock()
            .iter()
            .map(|m| m.object_id.clone())
            .collect();
        assert_eq!(remaining, vec!["obj-2".to_string(), "obj-3".to_string()]);
    }
}
