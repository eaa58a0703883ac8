use crate::bridge::PendingReplies;
use crate::broker::{PublishError, Publisher};
use crate::model::ForecastRequest;
use crate::store::{ReferenceStore, StoreError};
use async_trait::async_trait;
use deadpool_postgres::PoolError;
use hyper::body::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Reference store backed by fixed sets, with a switch that makes every query fail.
pub struct InMemoryStore {
    area_keys: BTreeSet<String>,
    consumer_groups: BTreeSet<String>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(area_keys: &[&str], consumer_groups: &[&str]) -> Self {
        InMemoryStore {
            area_keys: area_keys.iter().map(|k| k.to_string()).collect(),
            consumer_groups: consumer_groups.iter().map(|g| g.to_string()).collect(),
            unavailable: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn lookup(
        &self,
        known: &BTreeSet<String>,
        values: &[String],
    ) -> Result<Vec<String>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Pool(PoolError::Closed));
        }
        let matched: BTreeSet<&String> = values.iter().filter(|v| known.contains(*v)).collect();
        Ok(matched.into_iter().cloned().collect())
    }
}

#[async_trait]
impl ReferenceStore for InMemoryStore {
    async fn known_area_keys(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        self.lookup(&self.area_keys, keys)
    }

    async fn known_consumer_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError> {
        self.lookup(&self.consumer_groups, groups)
    }

    async fn all_consumer_groups(&self) -> Result<Vec<String>, StoreError> {
        let all: Vec<String> = self.consumer_groups.iter().cloned().collect();
        self.lookup(&self.consumer_groups, &all)
    }
}

#[derive(Clone, Debug)]
pub struct PublishedMessage {
    pub correlation_id: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn request(&self) -> ForecastRequest {
        serde_json::from_slice(&self.body).unwrap()
    }
}

enum Script {
    Answer { delays: Vec<Duration>, foreign_replies: usize },
    Silent,
    Reject,
}

/// Stands in for the broker and the calculation module behind it.
///
/// Records every published request and, depending on the script, answers it
/// through the pending-reply registry the way the reply dispatcher would.
pub struct ScriptedWorker {
    pending: Arc<PendingReplies>,
    script: Script,
    published: Mutex<Vec<PublishedMessage>>,
}

impl ScriptedWorker {
    /// Answers every request immediately with [`ScriptedWorker::reply_payload`].
    pub fn answering(pending: Arc<PendingReplies>) -> Self {
        Self::with_script(
            pending,
            Script::Answer {
                delays: vec![],
                foreign_replies: 0,
            },
        )
    }

    /// Never answers.
    pub fn silent(pending: Arc<PendingReplies>) -> Self {
        Self::with_script(pending, Script::Silent)
    }

    /// Fails every publish as if the broker refused the message.
    pub fn rejecting(pending: Arc<PendingReplies>) -> Self {
        Self::with_script(pending, Script::Reject)
    }

    /// Delays the answer to the n-th published request by `delays[n]`.
    pub fn with_delays(mut self, new_delays: Vec<Duration>) -> Self {
        if let Script::Answer { delays, .. } = &mut self.script {
            *delays = new_delays;
        }
        self
    }

    /// Sends `count` replies for unknown correlation ids before every answer.
    pub fn with_foreign_replies(mut self, count: usize) -> Self {
        if let Script::Answer {
            foreign_replies, ..
        } = &mut self.script
        {
            *foreign_replies = count;
        }
        self
    }

    fn with_script(pending: Arc<PendingReplies>, script: Script) -> Self {
        ScriptedWorker {
            pending,
            script,
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_payload(correlation_id: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"forecast":{{"correlationId":"{correlation_id}"}},"reference_usages":{{}},"municipal":{{}},"consumerGroup":{{}}}}"#
        ))
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for ScriptedWorker {
    async fn publish(&self, body: Vec<u8>, correlation_id: &str) -> Result<(), PublishError> {
        let (delays, foreign_replies) = match &self.script {
            Script::Reject => return Err(PublishError::Nacked),
            Script::Silent => (None, 0),
            Script::Answer {
                delays,
                foreign_replies,
            } => (Some(delays), *foreign_replies),
        };

        let index = {
            let mut published = self.published.lock();
            published.push(PublishedMessage {
                correlation_id: correlation_id.to_string(),
                body,
            });
            published.len() - 1
        };

        let Some(delays) = delays else {
            return Ok(());
        };
        let delay = delays.get(index).copied().unwrap_or_default();
        let pending = self.pending.clone();
        let correlation_id = correlation_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for n in 0..foreign_replies {
                pending.deliver(
                    &format!("foreign-{index}-{n}"),
                    Bytes::from_static(b"{\"foreign\":true}"),
                );
            }
            pending.deliver(&correlation_id, ScriptedWorker::reply_payload(&correlation_id));
        });
        Ok(())
    }
}
