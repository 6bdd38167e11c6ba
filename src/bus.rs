//! A topic-keyed publish/subscribe primitive. Generic over the payload type
//! so it backs both the IPC per-agent/tag channels and the lifecycle
//! [`crate::events::EventBus`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SubscriberId = u64;
type Subscriber<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct MessageBus<T> {
    channels: Arc<RwLock<HashMap<String, HashMap<SubscriberId, Subscriber<T>>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for MessageBus<T> {
    fn clone(&self) -> Self {
        Self {
            channels: self.channels.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T> Default for MessageBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> MessageBus<T> {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe a handler to `channel`. Returns an id usable with [`Self::unsubscribe`].
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_default()
            .insert(id, Arc::new(handler));
        id
    }

    /// Subscribe a handler that unsubscribes itself after its first delivery.
    pub async fn once(&self, channel: &str, handler: impl Fn(T) + Send + Sync + 'static) -> SubscriberId {
        let bus = self.clone();
        let channel_owned = channel.to_string();
        let id_holder: Arc<std::sync::Mutex<Option<SubscriberId>>> = Arc::new(std::sync::Mutex::new(None));
        let id_holder_for_closure = id_holder.clone();
        let wrapped = move |msg: T| {
            handler(msg);
            let bus = bus.clone();
            let channel = channel_owned.clone();
            let id_holder = id_holder_for_closure.clone();
            tokio::spawn(async move {
                let id = *id_holder.lock().expect("id holder mutex poisoned");
                if let Some(id) = id {
                    bus.unsubscribe(&channel, id).await;
                }
            });
        };
        let id = self.subscribe(channel, wrapped).await;
        *id_holder.lock().expect("id holder mutex poisoned") = Some(id);
        id
    }

    pub async fn unsubscribe(&self, channel: &str, id: SubscriberId) {
        let mut channels = self.channels.write().await;
        if let Some(subs) = channels.get_mut(channel) {
            subs.remove(&id);
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Deliver `msg` to every subscriber of `channel`. A subscriber that
    /// panics is isolated: its panic is caught and logged, publishers are
    /// never affected.
    pub async fn publish(&self, channel: &str, msg: T) {
        let subscribers: Vec<Subscriber<T>> = {
            let channels = self.channels.read().await;
            match channels.get(channel) {
                Some(subs) => subs.values().cloned().collect(),
                None => return,
            }
        };
        for handler in subscribers {
            let msg = msg.clone();
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(msg)));
            if outcome.is_err() {
                tracing::error!("message bus subscriber panicked on channel '{}'", channel);
            }
        }
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus: MessageBus<i32> = MessageBus::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = total.clone();
        bus.subscribe("ch", move |v| {
            t1.fetch_add(v as usize, Ordering::SeqCst);
        })
        .await;
        let t2 = total.clone();
        bus.subscribe("ch", move |v| {
            t2.fetch_add(v as usize, Ordering::SeqCst);
        })
        .await;

        bus.publish("ch", 5).await;
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus: MessageBus<i32> = MessageBus::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let id = bus
            .subscribe("ch", move |v| {
                t.fetch_add(v as usize, Ordering::SeqCst);
            })
            .await;

        bus.unsubscribe("ch", id).await;
        bus.publish("ch", 5).await;
        assert_eq!(total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn publish_is_isolated_from_panicking_subscribers() {
        let bus: MessageBus<i32> = MessageBus::new();
        bus.subscribe("ch", |_| panic!("boom")).await;
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        bus.subscribe("ch", move |v| {
            t.fetch_add(v as usize, Ordering::SeqCst);
        })
        .await;

        bus.publish("ch", 7).await;
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }
}
