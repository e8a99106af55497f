// ABOUTME: Synchronous publish/subscribe registry keyed by listener id.
// ABOUTME: Dispatch re-scans for listeners added mid-dispatch, up to a fixed round cap.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::event::Event;

/// Rounds of "new listener appeared during dispatch" tolerated per event.
pub const MAX_DISPATCH_ROUNDS: usize = 8;

pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("listener '{listener}' failed on {event_type}: {source}")]
    Listener {
        listener: String,
        event_type: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Listeners kept registering new listeners; almost certainly a cycle.
    #[error("dispatch of {event_type} did not settle after {rounds} rounds")]
    DispatchCycle {
        event_type: &'static str,
        rounds: usize,
    },
}

/// Receives every published event, synchronously on the publishing task.
///
/// Implementations should return quickly and spawn anything slow.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event) -> ListenerResult;

    /// Return `false` to skip an event without being called.
    fn accepts(&self, event: &Event) -> bool {
        let _ = event;
        true
    }

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Registration handle for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<ListenerId, Arc<dyn Listener>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId::new();
        let name = listener.name().to_string();
        self.listeners.write().insert(id, listener);
        debug!(listener = %name, "Listener subscribed");
        id
    }

    /// Subscribe a closure. Handy for one-off consumers.
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener {
            name: name.into(),
            handler,
        }))
    }

    /// Returns `true` if the listener was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().remove(&id);
        if let Some(listener) = &removed {
            debug!(listener = %listener.name(), "Listener unsubscribed");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `event` to every listener, including ones registered while
    /// this dispatch is running.
    ///
    /// The registry lock is never held while a listener runs, so listeners
    /// may subscribe or unsubscribe freely. The first listener error stops
    /// dispatch and is returned.
    pub fn publish(&self, event: &Event) -> Result<(), BusError> {
        let event_type = event.event_type();
        let mut notified: HashSet<ListenerId> = HashSet::new();
        let mut rounds = 0;

        loop {
            let pending: Vec<(ListenerId, Arc<dyn Listener>)> = self
                .listeners
                .read()
                .iter()
                .filter(|(id, _)| !notified.contains(*id))
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect();

            if pending.is_empty() {
                return Ok(());
            }
            if rounds == MAX_DISPATCH_ROUNDS {
                warn!(event_type, rounds, "Event dispatch did not settle");
                return Err(BusError::DispatchCycle { event_type, rounds });
            }
            rounds += 1;

            for (id, listener) in pending {
                notified.insert(id);
                if !listener.accepts(event) {
                    continue;
                }
                trace!(listener = %listener.name(), event_type, "Notifying listener");
                listener
                    .on_event(event)
                    .map_err(|source| BusError::Listener {
                        listener: listener.name().to_string(),
                        event_type,
                        source,
                    })?;
            }
        }
    }
}

struct FnListener<F> {
    name: String,
    handler: F,
}

impl<F> Listener for FnListener<F>
where
    F: Fn(&Event) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &Event) -> ListenerResult {
        (self.handler)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
