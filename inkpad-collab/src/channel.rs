//! Per-document publish/subscribe channel.
//!
//! Each topic (a document id) holds one bounded sender per subscribed
//! session. Publishing walks the subscriber map and offers the event to each
//! sender without waiting, so a closed or lagging recipient never blocks or
//! aborts delivery to the others. A full queue drops that one event for that
//! one recipient; a closed queue also unsubscribes it.
//!
//! Ordering: `publish` calls on one topic that are serialized by the caller
//! are observed by every subscriber in that order (per-topic FIFO).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::ChangeEvent;

/// Sending half of a subscriber's bounded event queue.
pub type EventSink = mpsc::Sender<Arc<ChangeEvent>>;

/// Queue depth the server gives each session.
pub const DEFAULT_EVENT_QUEUE: usize = 256;

/// Result of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Topic-based event channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Register `sink` under `subscriber_id`, replacing any previous sink.
    async fn subscribe(&self, topic: Uuid, subscriber_id: Uuid, sink: EventSink);

    /// Returns whether the subscriber was registered.
    async fn unsubscribe(&self, topic: Uuid, subscriber_id: Uuid) -> bool;

    /// Deliver `event` to every subscriber of `topic` except `skip`.
    async fn publish(
        &self,
        topic: Uuid,
        event: Arc<ChangeEvent>,
        skip: Option<Uuid>,
    ) -> PublishReport;

    /// Drop every subscriber of `topic`.
    async fn close(&self, topic: Uuid);
}

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub messages_published: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
    pub active_topics: usize,
}

struct AtomicHubStats {
    messages_published: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl AtomicHubStats {
    fn new() -> Self {
        Self {
            messages_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            failed_deliveries: AtomicU64::new(0),
        }
    }
}

type Subscribers = Arc<RwLock<HashMap<Uuid, EventSink>>>;

/// In-process [`Channel`] backed by tokio mpsc senders.
pub struct BroadcastHub {
    topics: RwLock<HashMap<Uuid, Subscribers>>,
    stats: AtomicHubStats,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            stats: AtomicHubStats::new(),
        }
    }

    async fn get_or_create(&self, topic: Uuid) -> Subscribers {
        // Fast path: read lock
        {
            let topics = self.topics.read().await;
            if let Some(subs) = topics.get(&topic) {
                return subs.clone();
            }
        }

        let mut topics = self.topics.write().await;
        // Double-check after acquiring write lock
        if let Some(subs) = topics.get(&topic) {
            return subs.clone();
        }
        let subs: Subscribers = Arc::new(RwLock::new(HashMap::new()));
        topics.insert(topic, subs.clone());
        subs
    }

    async fn get(&self, topic: Uuid) -> Option<Subscribers> {
        self.topics.read().await.get(&topic).cloned()
    }

    pub async fn subscriber_count(&self, topic: Uuid) -> usize {
        match self.get(topic).await {
            Some(subs) => subs.read().await.len(),
            None => 0,
        }
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            failed_deliveries: self.stats.failed_deliveries.load(Ordering::Relaxed),
            active_topics: self.topics.read().await.len(),
        }
    }
}

#[async_trait]
impl Channel for BroadcastHub {
    async fn subscribe(&self, topic: Uuid, subscriber_id: Uuid, sink: EventSink) {
        let subs = self.get_or_create(topic).await;
        subs.write().await.insert(subscriber_id, sink);
    }

    async fn unsubscribe(&self, topic: Uuid, subscriber_id: Uuid) -> bool {
        let Some(subs) = self.get(topic).await else {
            return false;
        };
        let removed = subs.write().await.remove(&subscriber_id).is_some();

        let mut topics = self.topics.write().await;
        if let Some(current) = topics.get(&topic) {
            if Arc::ptr_eq(current, &subs) && subs.read().await.is_empty() {
                topics.remove(&topic);
            }
        }
        removed
    }

    async fn publish(
        &self,
        topic: Uuid,
        event: Arc<ChangeEvent>,
        skip: Option<Uuid>,
    ) -> PublishReport {
        self.stats.messages_published.fetch_add(1, Ordering::Relaxed);
        let Some(subs) = self.get(topic).await else {
            return PublishReport::default();
        };

        let mut report = PublishReport::default();
        let mut dead = Vec::new();
        {
            let subs = subs.read().await;
            for (id, sink) in subs.iter() {
                if Some(*id) == skip {
                    continue;
                }
                match sink.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("Delivery to subscriber {id} on {topic} failed: queue full");
                        report.failed += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::warn!("Delivery to subscriber {id} on {topic} failed: receiver closed");
                        report.failed += 1;
                        dead.push(*id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = subs.write().await;
            for id in dead {
                subs.remove(&id);
            }
        }

        self.stats.deliveries.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats.failed_deliveries.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    async fn close(&self, topic: Uuid) {
        if let Some(subs) = self.topics.write().await.remove(&topic) {
            let count = subs.read().await.len();
            log::debug!("Closed topic {topic} with {count} subscribers");
        }
    }
}
