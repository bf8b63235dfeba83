//! Listener registration and event dispatch.
//!
//! Listeners are registered per event kind and invoked synchronously, in
//! arrival order, from the connection's frame-processing task. A failing
//! listener is logged and does not stop dispatch to the remaining listeners
//! or affect the connection. Listeners therefore must not block.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::warn;

use crate::protocol::{EventFrame, StreamStateChanged};

/// Events surfaced to client listeners.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake completed; the connection is identified.
    Connected,
    /// The connection closed, cleanly or not.
    Disconnected,
    /// A connection-level failure occurred.
    Error(String),
    /// The recorder's stream output changed state.
    StreamState(StreamStateChanged),
    /// Catch-all: any event frame the server sent, unfiltered.
    Frame(EventFrame),
}

/// Listener registration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    StreamState,
    Frame,
}

impl ClientEvent {
    /// The registration kind this event dispatches to.
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected => EventKind::Disconnected,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::StreamState(_) => EventKind::StreamState,
            ClientEvent::Frame(_) => EventKind::Frame,
        }
    }
}

/// Boxed async event handler.
pub type EventHandler = Arc<dyn Fn(ClientEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Ordered per-kind listener registry.
#[derive(Default)]
pub struct ListenerSet {
    inner: RwLock<Vec<(EventKind, EventHandler)>>,
}

impl ListenerSet {
    /// Register a listener for one event kind.
    pub fn add(&self, kind: EventKind, handler: EventHandler) {
        self.inner.write().push((kind, handler));
    }

    /// Dispatch one event to every matching listener, in registration order.
    pub async fn dispatch(&self, event: &ClientEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .inner
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!("Listener for {:?} failed: {e:#}", kind);
            }
        }
    }
}
