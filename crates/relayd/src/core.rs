//! The relay core pipeline: validate, store, fan out, and optionally
//! gossip-echo a published event.
//!
//! Control flow is validate → store.insert → dispatch → optional
//! gossip, returning a typed `Result` instead of raising; storage and
//! the subscription manager are held behind `Arc` so the core can be
//! shared cheaply across connections.

use crate::limits::RateLimiter;
use crate::storage::{EventStore, InsertOutcome, Query, RejectReason, StorageError};
use crate::subscription::SubscriptionManager;
use crate::validator::{self, ValidationError, ValidatorConfig};
use aether_core::capability::{self, CapabilityError};
use aether_core::types::{CapabilityToken, Event, Filter};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// The connection id gossip-originated publishes are tagged with.
/// Publishes carrying this origin are never re-echoed to gossip, which
/// is what keeps a gossip message from bouncing back out to the mesh it
/// came from.
pub const GOSSIP_ORIGIN: &str = "gossip";

/// A per-match delivery: `send(connection_id, subscription_id, event)`.
pub type SendFuture = crate::subscription::DispatchFuture;
pub type SendFn = crate::subscription::DispatchFn;

/// `gossip_publish(event)`, handed the admitted event to forward to the
/// gossip mesh. The mesh transport itself is out of scope.
pub type GossipFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type GossipFn = Arc<dyn Fn(Event) -> GossipFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("event rejected: {0:?}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// The relay core pipeline, shared across all connections. Storage and
/// the subscription manager own their own internal locking, so this
/// struct is cheap to hold behind an `Arc` and call concurrently.
pub struct RelayCore {
    store: Arc<dyn EventStore>,
    subscriptions: SubscriptionManager,
    rate_limiter: RateLimiter,
    validator_config: ValidatorConfig,
    now_ns: Box<dyn Fn() -> u64 + Send + Sync>,
    gossip_publish: Option<GossipFn>,
}

impl RelayCore {
    pub fn new(
        store: Arc<dyn EventStore>,
        rate_limiter: RateLimiter,
        validator_config: ValidatorConfig,
        now_ns: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            subscriptions: SubscriptionManager::new(),
            rate_limiter,
            validator_config,
            now_ns: Box::new(now_ns),
            gossip_publish: None,
        }
    }

    /// Attach a gossip-echo function. When set, every non-gossip-origin
    /// admitted publish is canonically serialized and handed to it.
    pub fn with_gossip(mut self, gossip_publish: GossipFn) -> Self {
        self.gossip_publish = Some(gossip_publish);
        self
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Event>, StorageError> {
        self.store.query(query)
    }

    pub fn subscribe(&self, connection_id: &str, subscription_id: &str, filters: Vec<Filter>) {
        self.subscriptions.add(connection_id, subscription_id, filters);
    }

    pub fn unsubscribe(&self, connection_id: &str, subscription_id: &str) {
        self.subscriptions.remove(connection_id, subscription_id);
    }

    pub fn clear(&self, connection_id: &str) {
        self.subscriptions.clear(connection_id);
    }

    /// Validate, store, and fan out `event` published on `origin_conn`.
    /// `send` is invoked once per matching subscription; this awaits
    /// every dispatched send before returning, so the caller (and, via
    /// it, the publishing connection's ack) only proceeds once every
    /// matching subscriber has at least been handed the event.
    pub async fn publish(
        &self,
        origin_conn: &str,
        event: Event,
        send: SendFn,
    ) -> Result<InsertOutcome, PublishError> {
        let now = (self.now_ns)();
        validator::validate_event(&event, &self.validator_config, &self.rate_limiter, now)?;

        let outcome = self.store.insert(event.clone())?;
        if let InsertOutcome::Rejected(reason) = &outcome {
            // Ephemeral is the one "rejection" that isn't a failure: the
            // event was never meant to be persisted, and the caller still
            // fans it out and acks as if it had been admitted.
            if *reason != RejectReason::Ephemeral {
                return Err(PublishError::Rejected(reason.clone()));
            }
        }

        let handles = self.subscriptions.dispatch(event.clone(), send);
        for handle in handles {
            // A panicking send task should not be silently swallowed,
            // but it also must not take down the publishing task; log
            // and move on exactly like a dropped connection would.
            let _ = handle.await;
        }

        if let Some(gossip) = &self.gossip_publish {
            if origin_conn != GOSSIP_ORIGIN {
                gossip(event).await;
            }
        }

        Ok(outcome)
    }

    /// The same pipeline as [`Self::publish`], gated by capability-chain
    /// enforcement. The distilled spec describes capability tokens as a
    /// standalone component without pinning a call site into `publish`;
    /// this is the natural integration point (see `DESIGN.md`).
    pub async fn publish_with_capability(
        &self,
        origin_conn: &str,
        event: Event,
        chain: &[CapabilityToken],
        required_capability: &str,
        usage: &HashMap<[u8; 32], u64>,
        send: SendFn,
    ) -> Result<InsertOutcome, PublishError> {
        let now = (self.now_ns)();
        capability::enforce_capability(chain, required_capability, now, usage)?;
        self.publish(origin_conn, event, send).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use aether_core::crypto::{event_id, generate_keypair, sign};
    use aether_core::types::Tag;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn core_with_memory_store(now: u64) -> RelayCore {
        let store = Arc::new(MemoryStore::new(0, move || now));
        RelayCore::new(store, RateLimiter::new(1000, 1000.0), ValidatorConfig::default(), move || now)
    }

    fn signed_event(kind: u16, created_at: u64, tags: Vec<Tag>, content: &[u8]) -> Event {
        let key = generate_keypair();
        let pubkey = key.verifying_key().to_bytes();
        let id = event_id(&pubkey, created_at, kind, &tags, content, None).unwrap();
        let sig = sign(&key, &id);
        Event {
            event_id: id,
            pubkey,
            created_at,
            kind,
            tags,
            content: content.to_vec(),
            sig,
            pow_nonce: None,
        }
    }

    fn noop_send() -> SendFn {
        Arc::new(|_conn, _sub, _event| Box::pin(async {}))
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_to_matching_subscriber() {
        let core = core_with_memory_store(1_000_000_000);
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);

        core.subscribe("b", "s1", vec![Filter {
            kinds: Some(std::collections::BTreeSet::from([1])),
            ..Default::default()
        }]);

        let send: SendFn = Arc::new(move |conn, sub, event| {
            let received = Arc::clone(&received_clone);
            Box::pin(async move {
                received.lock().unwrap().push((conn, sub, event));
            })
        });

        let event = signed_event(1, 1_000_000_000, vec![], b"hello");
        core.publish("a", event.clone(), send).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "b");
        assert_eq!(received[0].1, "s1");
        assert_eq!(received[0].2, event);
    }

    #[tokio::test]
    async fn replaceable_overwrite_keeps_only_latest() {
        let core = core_with_memory_store(1_000_000_000);
        let pubkey_key = generate_keypair();
        let pubkey = pubkey_key.verifying_key().to_bytes();

        let mut e1 = signed_event(10_000, 100, vec![], b"v1");
        e1.pubkey = pubkey;
        e1.event_id = event_id(&pubkey, 100, 10_000, &[], b"v1", None).unwrap();
        e1.sig = sign(&pubkey_key, &e1.event_id);

        let mut e2 = signed_event(10_000, 200, vec![], b"v2");
        e2.pubkey = pubkey;
        e2.event_id = event_id(&pubkey, 200, 10_000, &[], b"v2", None).unwrap();
        e2.sig = sign(&pubkey_key, &e2.event_id);

        core.publish("a", e1, noop_send()).await.unwrap();
        core.publish("a", e2.clone(), noop_send()).await.unwrap();

        let results = core
            .query(&Query {
                kinds: Some(vec![10_000]),
                pubkeys: Some(vec![pubkey]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results, vec![e2]);
    }

    #[tokio::test]
    async fn ephemeral_events_fan_out_without_being_queryable() {
        let core = core_with_memory_store(1_000_000_000);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        core.subscribe("b", "s1", vec![Filter::default()]);
        let send: SendFn = Arc::new(move |_conn, _sub, _event| {
            let counter = Arc::clone(&counter_clone);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let event = signed_event(20_000, 1_000_000_000, vec![], b"ephemeral");
        core.publish("a", event, send).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(core.query(&Query::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn gossip_is_not_re_echoed_for_gossip_origin() {
        let core = core_with_memory_store(1_000_000_000);
        let gossip_calls = Arc::new(AtomicUsize::new(0));
        let gossip_calls_clone = Arc::clone(&gossip_calls);
        let core = core.with_gossip(Arc::new(move |_event| {
            let gossip_calls = Arc::clone(&gossip_calls_clone);
            Box::pin(async move {
                gossip_calls.fetch_add(1, Ordering::SeqCst);
            })
        }));

        let e1 = signed_event(1, 1_000_000_000, vec![], b"from client");
        core.publish("client", e1, noop_send()).await.unwrap();
        assert_eq!(gossip_calls.load(Ordering::SeqCst), 1);

        let e2 = signed_event(1, 1_000_000_000, vec![], b"from gossip");
        core.publish(GOSSIP_ORIGIN, e2, noop_send()).await.unwrap();
        assert_eq!(gossip_calls.load(Ordering::SeqCst), 1);
    }
}
