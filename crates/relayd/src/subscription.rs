//! Subscription registry and fan-out dispatch.

use aether_core::filter::matches_subscription;
use aether_core::types::{Event, Filter, Subscription};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A per-match delivery callback: `send(connection_id, subscription_id,
/// event)`. A trait object (rather than a generic) because the relay
/// core needs to hand the same boxed closure through to every
/// connection's dispatcher without naming its concrete type.
pub type DispatchFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type DispatchFn = Arc<dyn Fn(String, String, Event) -> DispatchFuture + Send + Sync>;

/// All subscriptions, keyed by connection id then subscription id —
/// matching the original relay's nested-dict layout so that clearing a
/// whole connection (on disconnect) is a single map removal.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<String, HashMap<String, Subscription>>>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register or overwrite a subscription for `connection_id`.
    pub fn add(&self, connection_id: &str, subscription_id: &str, filters: Vec<Filter>) {
        let subscription = Subscription {
            connection_id: connection_id.to_string(),
            subscription_id: subscription_id.to_string(),
            filters,
        };
        self.subscriptions
            .write()
            .entry(connection_id.to_string())
            .or_default()
            .insert(subscription_id.to_string(), subscription);
    }

    /// Remove one subscription. Idempotent: removing an absent
    /// subscription is not an error.
    pub fn remove(&self, connection_id: &str, subscription_id: &str) {
        let mut subscriptions = self.subscriptions.write();
        if let Some(bucket) = subscriptions.get_mut(connection_id) {
            bucket.remove(subscription_id);
            if bucket.is_empty() {
                subscriptions.remove(connection_id);
            }
        }
    }

    /// Remove every subscription for `connection_id`, e.g. on disconnect.
    pub fn clear(&self, connection_id: &str) {
        self.subscriptions.write().remove(connection_id);
    }

    /// Every `(connection_id, subscription_id)` whose filters match
    /// `event`.
    pub fn matches(&self, event: &Event) -> Vec<(String, String)> {
        self.subscriptions
            .read()
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|sub| matches_subscription(event, sub))
            .map(|sub| (sub.connection_id.clone(), sub.subscription_id.clone()))
            .collect()
    }

    /// Spawn one send task per matching subscription. `send` is invoked
    /// with `(connection_id, subscription_id, event)`. Returns the join
    /// handle for each spawned task so a caller that needs to wait for
    /// every send to land can drive them to completion; a caller that
    /// doesn't care can simply drop the returned vector.
    pub fn dispatch(&self, event: Event, send: DispatchFn) -> Vec<tokio::task::JoinHandle<()>> {
        let event = Arc::new(event);
        self.matches(&event)
            .into_iter()
            .map(|(connection_id, subscription_id)| {
                let send = Arc::clone(&send);
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    send(connection_id, subscription_id, (*event).clone()).await;
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> Event {
        Event {
            event_id: [0u8; 32],
            pubkey: [0u8; 32],
            created_at: 100,
            kind: 1,
            tags: vec![],
            content: vec![],
            sig: [0u8; 64],
            pow_nonce: None,
        }
    }

    #[test]
    fn add_overwrites_same_subscription_id() {
        let manager = SubscriptionManager::new();
        let mut only_kind_2 = Filter::default();
        only_kind_2.kinds = Some(std::collections::BTreeSet::from([2]));
        manager.add("c1", "s1", vec![only_kind_2]);
        // The event (kind 1) doesn't match the first registration's filter.
        assert!(manager.matches(&sample_event()).is_empty());

        manager.add("c1", "s1", vec![Filter::default()]);
        // Re-registering under the same (connection, sub) id replaces the
        // filter set rather than accumulating it.
        assert_eq!(
            manager.matches(&sample_event()),
            vec![("c1".to_string(), "s1".to_string())]
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let manager = SubscriptionManager::new();
        manager.remove("absent", "absent");
        manager.add("c1", "s1", vec![Filter::default()]);
        manager.remove("c1", "s1");
        manager.remove("c1", "s1");
        assert!(manager.matches(&sample_event()).is_empty());
    }

    #[test]
    fn clear_drops_every_subscription_for_a_connection() {
        let manager = SubscriptionManager::new();
        manager.add("c1", "s1", vec![Filter::default()]);
        manager.add("c1", "s2", vec![Filter::default()]);
        manager.clear("c1");
        assert!(manager.matches(&sample_event()).is_empty());
    }

    #[tokio::test]
    async fn dispatch_invokes_send_for_each_match() {
        let manager = SubscriptionManager::new();
        manager.add("c1", "s1", vec![Filter::default()]);
        manager.add("c2", "s1", vec![Filter::default()]);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let send: DispatchFn = Arc::new(move |_conn: String, _sub: String, _event: Event| {
            let counter = Arc::clone(&counter_clone);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        manager.dispatch(sample_event(), send);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
