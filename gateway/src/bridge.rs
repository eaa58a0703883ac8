//! Synchronous request/reply on top of the asynchronous message bus.
//!
//! Every request registers a single-shot slot under its correlation id before
//! it is published. The broker dispatcher hands each reply to the slot with the
//! matching id, so concurrent requests never see each other's replies. The
//! slot is removed when the request finishes, however it finishes.

use crate::broker::{PublishError, Publisher};
use crate::metrics_defs::{BRIDGE_PENDING, BRIDGE_TIMEOUTS, BROKER_PUBLISH_FAILURES};
use hyper::body::Bytes;
use parking_lot::Mutex;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("no reply for {correlation_id} before the deadline")]
    Timeout { correlation_id: String },
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("a request with correlation id {0} is already waiting")]
    DuplicateToken(String),
    #[error("reply slot closed without a reply")]
    ReplyDropped,
}

/// Registry of requests waiting for a reply, keyed by correlation id.
#[derive(Default)]
pub struct PendingReplies {
    waiting: Mutex<HashMap<String, oneshot::Sender<Bytes>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, token: &str) -> Result<Waiter, BridgeError> {
        let (sender, receiver) = oneshot::channel();

        let mut waiting = self.waiting.lock();
        if waiting.contains_key(token) {
            return Err(BridgeError::DuplicateToken(token.to_string()));
        }
        waiting.insert(token.to_string(), sender);
        gauge!(BRIDGE_PENDING).set(waiting.len() as f64);

        Ok(Waiter {
            registry: self.clone(),
            token: token.to_string(),
            receiver,
        })
    }

    /// Hands a reply to the request waiting on `token`.
    ///
    /// Returns false when nobody is waiting for it any more.
    pub fn deliver(&self, token: &str, payload: Bytes) -> bool {
        let sender = {
            let mut waiting = self.waiting.lock();
            let sender = waiting.remove(token);
            gauge!(BRIDGE_PENDING).set(waiting.len() as f64);
            sender
        };

        match sender {
            Some(sender) => sender.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiting.lock().len()
    }

    fn remove(&self, token: &str) {
        let mut waiting = self.waiting.lock();
        waiting.remove(token);
        gauge!(BRIDGE_PENDING).set(waiting.len() as f64);
    }
}

/// Receiving end of a registered slot. Dropping it deregisters the token.
pub struct Waiter {
    registry: Arc<PendingReplies>,
    token: String,
    receiver: oneshot::Receiver<Bytes>,
}

impl Waiter {
    pub async fn recv(&mut self) -> Result<Bytes, BridgeError> {
        (&mut self.receiver)
            .await
            .map_err(|_| BridgeError::ReplyDropped)
    }

    /// Stops accepting replies. Returns a reply that was delivered before the
    /// slot closed.
    fn cancel(&mut self) -> Option<Bytes> {
        self.registry.remove(&self.token);
        self.receiver.close();
        match self.receiver.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.registry.remove(&self.token);
    }
}

#[derive(Debug)]
pub struct Reply {
    pub payload: Bytes,
    /// Time from publishing the request to receiving the reply
    pub elapsed: Duration,
}

pub struct Bridge {
    pending: Arc<PendingReplies>,
    publisher: Arc<dyn Publisher>,
    timeout: Duration,
}

impl Bridge {
    pub fn new(
        pending: Arc<PendingReplies>,
        publisher: Arc<dyn Publisher>,
        timeout: Duration,
    ) -> Self {
        Bridge {
            pending,
            publisher,
            timeout,
        }
    }

    /// Publishes `body` and waits for the reply carrying the same correlation
    /// id. Publishing and waiting share one deadline.
    pub async fn request(&self, correlation_id: &str, body: Vec<u8>) -> Result<Reply, BridgeError> {
        let deadline = Instant::now() + self.timeout;
        let mut waiter = self.pending.register(correlation_id)?;

        let published_at = Instant::now();
        match tokio::time::timeout_at(deadline, self.publisher.publish(body, correlation_id)).await
        {
            Ok(Ok(())) => {
                tracing::debug!(correlation_id, "Published forecast request");
            }
            Ok(Err(e)) => {
                counter!(BROKER_PUBLISH_FAILURES).increment(1);
                return Err(e.into());
            }
            Err(_) => return Err(self.timed_out(correlation_id)),
        }

        let outcome = tokio::time::timeout_at(deadline, waiter.recv()).await;
        let payload = match outcome {
            Ok(reply) => reply?,
            Err(_) => match waiter.cancel() {
                Some(payload) => payload,
                None => return Err(self.timed_out(correlation_id)),
            },
        };

        let elapsed = published_at.elapsed();
        tracing::debug!(
            correlation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Matched reply"
        );
        Ok(Reply { payload, elapsed })
    }

    fn timed_out(&self, correlation_id: &str) -> BridgeError {
        counter!(BRIDGE_TIMEOUTS).increment(1);
        tracing::warn!(
            correlation_id,
            timeout_secs = self.timeout.as_secs_f64(),
            still_waiting = self.pending.pending_count(),
            "Calculation module did not reply in time"
        );
        BridgeError::Timeout {
            correlation_id: correlation_id.to_string(),
        }
    }
}
