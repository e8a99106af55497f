// ABOUTME: In-process event bus decoupling the registry from its consumers.
// ABOUTME: Listeners run synchronously on the publishing task; nothing is buffered.

mod bus;
mod event;

pub use bus::{BusError, EventBus, Listener, ListenerId, ListenerResult, MAX_DISPATCH_ROUNDS};
pub use event::Event;
