//! Connection dispatch: bridges transport frames to [`crate::core`]
//! operations and owns the per-connection state and the ack-before-echo
//! buffering.
//!
//! The concrete socket (WebSocket/QUIC/HTTP/SSE) is out of scope; a
//! binding only needs to implement [`FrameSink`] and call into
//! [`Dispatcher`] with decoded messages.

use crate::core::{PublishError, RelayCore, SendFn};
use aether_core::types::{CapabilityToken, Event, Filter};
use aether_net::noise::NoiseChannel;
use aether_net::wire::{Encoding, Message, WireEvent};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Build an outbound `event` message, converting to the wire shape at this
/// one boundary. An event whose content isn't valid UTF-8 can't be
/// represented on the wire; rather than panic mid-dispatch, log and drop
/// just that delivery the same way a closed-connection send is tolerated.
fn event_message(subscription_id: String, event: Event) -> Option<Message> {
    match WireEvent::try_from(&event) {
        Ok(event) => Some(Message::Event { subscription_id, event }),
        Err(err) => {
            tracing::warn!(error = %err, "dropping event delivery: not representable on the wire");
            None
        }
    }
}

/// A transport-agnostic outbound sink: "send this message to this
/// connection". Sends to a connection that has already torn down must be
/// tolerated as a no-op — the connection's own teardown path is what
/// observes and reports that failure.
pub trait FrameSink: Send + Sync {
    fn send(&self, connection_id: String, message: Message) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Per-connection state owned by the dispatcher.
pub struct ConnectionState {
    pub connection_id: String,
    pub encoding: Encoding,
    pub noise: Option<NoiseChannel>,
    handshake_done: AtomicBool,
}

impl ConnectionState {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            encoding: Encoding::Json,
            noise: None,
            handshake_done: AtomicBool::new(false),
        }
    }

    pub fn handshake_done(&self) -> bool {
        self.handshake_done.load(Ordering::SeqCst)
    }

    pub fn mark_handshake_done(&self) {
        self.handshake_done.store(true, Ordering::SeqCst);
    }
}

/// Bridges decoded wire messages to [`RelayCore`] operations for every
/// connection sharing one `sink`.
pub struct Dispatcher<S: FrameSink> {
    core: Arc<RelayCore>,
    sink: Arc<S>,
}

impl<S: FrameSink + 'static> Dispatcher<S> {
    pub fn new(core: Arc<RelayCore>, sink: Arc<S>) -> Self {
        Self { core, sink }
    }

    pub fn core(&self) -> &Arc<RelayCore> {
        &self.core
    }

    /// Handle a `publish` message from `connection_id`, enforcing
    /// self-delivery ordering: any event echoed back to the publishing
    /// connection itself is buffered and flushed only after the
    /// ack/error response, never interleaved before it.
    pub async fn handle_publish(&self, connection_id: &str, event: Event) -> Result<(), PublishError> {
        let buffered: Arc<Mutex<Vec<(String, Event)>>> = Arc::new(Mutex::new(Vec::new()));
        let send = self.buffering_send(connection_id, Arc::clone(&buffered));

        let result = self.core.publish(connection_id, event, send).await;
        self.finish_publish(connection_id, &result, buffered).await;
        result.map(|_| ())
    }

    /// As [`Self::handle_publish`], gated by capability enforcement.
    pub async fn handle_publish_with_capability(
        &self,
        connection_id: &str,
        event: Event,
        chain: &[CapabilityToken],
        required_capability: &str,
        usage: &HashMap<[u8; 32], u64>,
    ) -> Result<(), PublishError> {
        let buffered: Arc<Mutex<Vec<(String, Event)>>> = Arc::new(Mutex::new(Vec::new()));
        let send = self.buffering_send(connection_id, Arc::clone(&buffered));

        let result = self
            .core
            .publish_with_capability(connection_id, event, chain, required_capability, usage, send)
            .await;
        self.finish_publish(connection_id, &result, buffered).await;
        result.map(|_| ())
    }

    fn buffering_send(&self, connection_id: &str, buffered: Arc<Mutex<Vec<(String, Event)>>>) -> SendFn {
        let sink = Arc::clone(&self.sink);
        let origin = connection_id.to_string();
        Arc::new(move |conn_id: String, subscription_id: String, event: Event| {
            let sink = Arc::clone(&sink);
            let buffered = Arc::clone(&buffered);
            let origin = origin.clone();
            Box::pin(async move {
                if conn_id == origin {
                    buffered.lock().unwrap().push((subscription_id, event));
                    return;
                }
                if let Some(message) = event_message(subscription_id, event) {
                    sink.send(conn_id, message).await;
                }
            })
        })
    }

    async fn finish_publish(
        &self,
        connection_id: &str,
        result: &Result<crate::storage::InsertOutcome, PublishError>,
        buffered: Arc<Mutex<Vec<(String, Event)>>>,
    ) {
        match result {
            Ok(_) => {
                self.sink.send(connection_id.to_string(), Message::Ack {}).await;
            }
            Err(err) => {
                self.sink
                    .send(
                        connection_id.to_string(),
                        Message::Error {
                            error: err.to_string(),
                        },
                    )
                    .await;
            }
        }
        let drained = std::mem::take(&mut *buffered.lock().unwrap());
        for (subscription_id, event) in drained {
            if let Some(message) = event_message(subscription_id, event) {
                self.sink.send(connection_id.to_string(), message).await;
            }
        }
    }

    pub fn handle_subscribe(&self, connection_id: &str, subscription_id: &str, filters: Vec<Filter>) {
        self.core.subscribe(connection_id, subscription_id, filters);
    }

    pub fn handle_unsubscribe(&self, connection_id: &str, subscription_id: &str) {
        self.core.unsubscribe(connection_id, subscription_id);
    }

    /// Called on connection teardown: drops every subscription the
    /// connection owned. Idempotent.
    pub fn teardown(&self, connection_id: &str) {
        self.core.clear(connection_id);
    }
}
