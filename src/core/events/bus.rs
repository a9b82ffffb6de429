use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use super::base::{DeleteEvent, EventKind};
use crate::ports::EntityKind;

pub type EventHandler = Arc<dyn Fn(DeleteEvent) + Send + Sync>;

/// Transport-side subscriber handle. WebSocket and SSE connections implement
/// this; the bus only knows about text frames.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Push one serialized frame. An `Err` marks the connection dead and the
    /// bus drops the subscription.
    async fn send(&self, frame: &str) -> Result<(), String>;
}

/// Per-subscriber event filter.
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    pub entity_kind: Option<EntityKind>,
    pub event_kind: Option<EventKind>,
}

impl SubscriberFilter {
    pub fn matches(&self, event: &DeleteEvent) -> bool {
        if let Some(kind) = &self.entity_kind {
            if *kind != event.entity_kind {
                return false;
            }
        }
        if let Some(kind) = &self.event_kind {
            if *kind != event.kind {
                return false;
            }
        }
        true
    }
}

struct RemoteSubscriber {
    id: u64,
    filter: SubscriberFilter,
    sink: Arc<dyn RemoteSink>,
}

/// Fan-out hub for delete/restore events.
///
/// In-process handlers register under `delete`, `delete:<kind>`, `restore`
/// or `restore:<kind>`; transport adapters either tap the broadcast channel
/// or register a [`RemoteSink`] with a filter. A bounded ring keeps the most
/// recent events for inspection.
pub struct DeleteEventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    remotes: Arc<RwLock<Vec<RemoteSubscriber>>>,
    recent: Mutex<VecDeque<DeleteEvent>>,
    channel: broadcast::Sender<DeleteEvent>,
    capacity: usize,
    next_subscriber: Mutex<u64>,
}

impl DeleteEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            remotes: Arc::new(RwLock::new(Vec::new())),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            channel,
            capacity,
            next_subscriber: Mutex::new(0),
        }
    }

    pub async fn register(&self, topic: &str, handler: EventHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(topic.to_string()).or_default().push(handler);
        debug!("Registered handler for topic: {}", topic);
    }

    /// Broadcast-channel tap for transport adapters.
    pub fn subscribe(&self) -> broadcast::Receiver<DeleteEvent> {
        self.channel.subscribe()
    }

    /// Attach a remote subscriber; returns its id for explicit detach.
    pub async fn subscribe_remote(
        &self,
        sink: Arc<dyn RemoteSink>,
        filter: SubscriberFilter,
    ) -> u64 {
        let id = {
            let mut next = self.next_subscriber.lock();
            *next += 1;
            *next
        };
        self.remotes
            .write()
            .await
            .push(RemoteSubscriber { id, filter, sink });
        debug!("Remote subscriber {} attached", id);
        id
    }

    pub async fn unsubscribe_remote(&self, id: u64) {
        self.remotes.write().await.retain(|s| s.id != id);
    }

    pub async fn remote_count(&self) -> usize {
        self.remotes.read().await.len()
    }

    /// Fan an event out to the ring, the channel, in-process handlers and
    /// remote sinks. A remote whose send fails is dropped on the spot.
    pub async fn emit(&self, event: DeleteEvent) {
        {
            let mut recent = self.recent.lock();
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // Lagging receivers are their own problem; an error only means no
        // channel subscriber is currently attached.
        let _ = self.channel.send(event.clone());

        let handlers = self.handlers.read().await;
        for topic in [event.topic(), event.typed_topic()] {
            if let Some(topic_handlers) = handlers.get(&topic) {
                for handler in topic_handlers {
                    let handler = Arc::clone(handler);
                    let event = event.clone();
                    tokio::spawn(async move {
                        handler(event);
                    });
                }
            }
        }
        drop(handlers);

        let frame = match serde_json::to_string(&event.remote_payload()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize event {}: {}", event.id, e);
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let remotes = self.remotes.read().await;
            let sends = remotes
                .iter()
                .filter(|sub| sub.filter.matches(&event))
                .map(|sub| {
                    let frame = frame.as_str();
                    async move { (sub.id, sub.sink.send(frame).await) }
                });
            for (id, result) in futures::future::join_all(sends).await {
                if let Err(e) = result {
                    warn!("Remote subscriber {} send failed, dropping: {}", id, e);
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            self.remotes.write().await.retain(|s| !dead.contains(&s.id));
        }
    }

    /// Most recent events, newest last, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<DeleteEvent> {
        let recent = self.recent.lock();
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }
}

impl Default for DeleteEventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteSink for CountingSink {
        async fn send(&self, _frame: &str) -> Result<(), String> {
            if self.fail {
                return Err("gone".to_string());
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delete_event(kind: EntityKind, id: &str) -> DeleteEvent {
        DeleteEvent::new(EventKind::Delete, kind, id, "tester")
    }

    #[tokio::test]
    async fn test_typed_topic_handler() {
        let bus = DeleteEventBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let handler: EventHandler = Arc::new(move |_event| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.register("delete:contact", handler).await;

        bus.emit(delete_event(EntityKind::Contact, "c1")).await;
        bus.emit(delete_event(EntityKind::Fact, "f1")).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ring_buffer_bounded() {
        let bus = DeleteEventBus::new(3);
        for i in 0..5 {
            bus.emit(delete_event(EntityKind::Fact, &format!("f{}", i))).await;
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].entity_id, "f2");
        assert_eq!(recent[2].entity_id, "f4");
    }

    #[tokio::test]
    async fn test_failed_sink_auto_unsubscribes() {
        let bus = DeleteEventBus::new(10);
        let good = Arc::new(CountingSink { sent: AtomicUsize::new(0), fail: false });
        let bad = Arc::new(CountingSink { sent: AtomicUsize::new(0), fail: true });

        bus.subscribe_remote(good.clone(), SubscriberFilter::default()).await;
        bus.subscribe_remote(bad, SubscriberFilter::default()).await;
        assert_eq!(bus.remote_count().await, 2);

        bus.emit(delete_event(EntityKind::Contact, "c1")).await;
        assert_eq!(bus.remote_count().await, 1);
        assert_eq!(good.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_filter() {
        let bus = DeleteEventBus::new(10);
        let sink = Arc::new(CountingSink { sent: AtomicUsize::new(0), fail: false });
        bus.subscribe_remote(
            sink.clone(),
            SubscriberFilter {
                entity_kind: Some(EntityKind::Contact),
                event_kind: Some(EventKind::Delete),
            },
        )
        .await;

        bus.emit(delete_event(EntityKind::Contact, "c1")).await;
        bus.emit(delete_event(EntityKind::Fact, "f1")).await;
        bus.emit(DeleteEvent::new(EventKind::Restore, EntityKind::Contact, "c1", "tester"))
            .await;

        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }
}
