//! Inbound violation delivery.
//!
//! Signal sources (client detectors posting over HTTP, in-process detectors, a remote
//! monitor) publish [`Violation`]s keyed by session id. Each monitored session holds one
//! subscription for as long as it is running; events for sessions without a subscription
//! are logged and dropped.
//!
//! Delivery is at-least-once and may reorder. The channel does not deduplicate, that is
//! left to the session's [`ViolationAccumulator`](super::accumulator::ViolationAccumulator).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::Violation;
use crate::error_handling::types::ViolationError;

/// Default per-session queue depth.
pub const DEFAULT_CAPACITY: usize = 64;

/// Many-producer, one-consumer-per-session router.
pub struct ViolationChannel {
    subscribers: RwLock<HashMap<Uuid, Sender<Violation>>>,
    capacity: usize,
}

impl ViolationChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens the subscription for `session_id`, replacing any previous one.
    pub fn subscribe(&self, session_id: Uuid) -> Receiver<Violation> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut subs) = self.subscribers.write() {
            if subs.insert(session_id, tx).is_some() {
                warn!("[{}] Replaced an existing violation subscription", session_id);
            }
        }
        debug!("[{}] Subscribed to violation events", session_id);
        rx
    }

    pub fn unsubscribe(&self, session_id: Uuid) {
        if let Ok(mut subs) = self.subscribers.write() {
            if subs.remove(&session_id).is_some() {
                debug!("[{}] Unsubscribed from violation events", session_id);
            }
        }
    }

    pub fn is_subscribed(&self, session_id: Uuid) -> bool {
        self.subscribers
            .read()
            .map(|subs| subs.contains_key(&session_id))
            .unwrap_or(false)
    }

    /// Delivers `violation` to its session's queue, waiting if the queue is full.
    ///
    /// Returns [`ViolationError::Stale`] when the session is not monitored (never was, or
    /// already ended); the event is dropped.
    pub async fn publish(&self, violation: Violation) -> Result<(), ViolationError> {
        let session_id = violation.session_id;
        let sender = self
            .subscribers
            .read()
            .ok()
            .and_then(|subs| subs.get(&session_id).cloned());

        let Some(sender) = sender else {
            warn!(
                "[{}] Dropping violation {} ({}): session is not monitored",
                session_id, violation.id, violation.kind
            );
            return Err(ViolationError::Stale(session_id));
        };

        let violation_id = violation.id.clone();
        if sender.send(violation).await.is_err() {
            // consumer went away between lookup and send
            self.unsubscribe(session_id);
            warn!(
                "[{}] Dropping violation {}: session stopped listening",
                session_id, violation_id
            );
            return Err(ViolationError::Stale(session_id));
        }
        debug!("[{}] Queued violation {}", session_id, violation_id);
        Ok(())
    }

    /// Forwards everything received on `inbound` (e.g. a remote monitor feed) until the
    /// feed closes. Stale events are dropped by [`publish`](Self::publish).
    pub fn spawn_ingress(self: Arc<Self>, mut inbound: Receiver<Violation>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(violation) = inbound.recv().await {
                let _ = self.publish(violation).await;
            }
            debug!("Violation ingress closed");
        })
    }
}

impl Default for ViolationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Closes `receiver` and logs whatever was still queued. Used when a session stops being
/// monitored so late events are accounted for rather than silently lost.
pub fn drain_stale(session_id: Uuid, receiver: &mut Receiver<Violation>) -> usize {
    receiver.close();
    let mut dropped = 0;
    while let Ok(v) = receiver.try_recv() {
        warn!(
            "[{}] Dropping violation {} ({}) received after monitoring ended",
            session_id, v.id, v.kind
        );
        dropped += 1;
    }
    dropped
}
