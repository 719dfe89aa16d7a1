use crate::sync::config::SUBSCRIPTION_CHANNEL_CAPACITY;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// A persisted cache mutation, keyed by primary key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange<V> {
    Added { key: String, object: V },
    Updated { key: String, object: V },
    Deleted { key: String, object: V },
}

impl<V> CacheChange<V> {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Added { key, .. } | Self::Updated { key, .. } | Self::Deleted { key, .. } => key,
        }
    }

    #[must_use]
    pub const fn object(&self) -> &V {
        match self {
            Self::Added { object, .. }
            | Self::Updated { object, .. }
            | Self::Deleted { object, .. } => object,
        }
    }
}

pub struct Subscription<V> {
    pub id: String,
    pub pattern: String,
    pub sender: mpsc::Sender<CacheChange<V>>,
}

impl<V> Subscription<V> {
    #[must_use]
    pub fn new(pattern: String, capacity: usize) -> (Self, mpsc::Receiver<CacheChange<V>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4().to_string();

        (
            Self {
                id,
                pattern,
                sender: tx,
            },
            rx,
        )
    }
}

pub struct SubscriptionManager<V> {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription<V>>>>>,
    capacity: usize,
}

impl<V: Clone> Default for SubscriptionManager<V> {
    fn default() -> Self {
        Self::new(SUBSCRIPTION_CHANNEL_CAPACITY)
    }
}

impl<V: Clone> SubscriptionManager<V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to changes whose key matches `pattern` (`*`, an exact key,
    /// or a prefix ending in `*`)
    #[allow(clippy::significant_drop_tightening)]
    pub async fn subscribe(&self, pattern: String) -> (String, mpsc::Receiver<CacheChange<V>>) {
        let (subscription, receiver) = Subscription::new(pattern.clone(), self.capacity);
        let id = subscription.id.clone();

        let mut subs = self.subscriptions.write().await;
        subs.entry(pattern).or_insert_with(Vec::new).push(subscription);

        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        let mut subs = self.subscriptions.write().await;

        for (_, subscriptions) in subs.iter_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        subs.retain(|_, v| !v.is_empty());
    }

    /// Delivers `change` to every matching subscriber without waiting.
    /// Subscribers that fall behind by more than the channel capacity miss
    /// changes; closed subscriptions are dropped.
    pub async fn notify(&self, change: &CacheChange<V>) {
        let mut closed = Vec::new();
        {
            let subs = self.subscriptions.read().await;
            for (pattern, subscriptions) in subs.iter() {
                if !Self::pattern_matches(pattern, change.key()) {
                    continue;
                }
                for subscription in subscriptions {
                    match subscription.sender.try_send(change.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                "Subscriber {} lagging, dropped change for {}",
                                subscription.id,
                                change.key()
                            );
                        }
                        Err(TrySendError::Closed(_)) => closed.push(subscription.id.clone()),
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(&id).await;
        }
    }

    fn pattern_matches(pattern: &str, cache_key: &str) -> bool {
        if pattern == "*" || pattern == cache_key {
            return true;
        }

        // "Pod/*" matches "Pod/default/web-0"
        if let Some(prefix) = pattern.strip_suffix('*') {
            return cache_key.starts_with(prefix);
        }

        false
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }
}
