//! Event system for connection observability.
//!
//! Two observation styles are offered over the same events:
//!
//! - callback listeners ([`EventListener`]), collected at configuration time in
//!   [`EventListeners`] or attached at runtime to an [`EventBus`];
//! - channel subscriptions ([`EventBus::subscribe`]) backed by a tokio
//!   broadcast channel, for observers that prefer to `await` events.
//!
//! A listener that panics never prevents the remaining listeners from running,
//! and never unwinds into the code that emitted the event.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel behind [`EventBus::subscribe`].
const CHANNEL_CAPACITY: usize = 64;

/// Trait for events emitted by client components.
pub trait ClientEvent: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g., "recovered", "state_transition").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the name of the component instance that emitted this event.
    fn source_name(&self) -> &str;
}

/// Trait for listening to client events.
pub trait EventListener<E: ClientEvent>: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &E);
}

/// Type alias for shared event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// A collection of event listeners assembled at configuration time.
#[derive(Clone)]
pub struct EventListeners<E: ClientEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: ClientEvent> EventListeners<E> {
    /// Creates a new empty event listener collection.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Adds a listener to the collection.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// If a listener panics, the panic is caught and the remaining listeners
    /// will still be called.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            notify(listener.as_ref(), event);
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    fn into_inner(self) -> Vec<BoxedEventListener<E>> {
        self.listeners
    }
}

impl<E: ClientEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ClientEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// Handle identifying a listener attached to an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Runtime event dispatch shared by a component and its observers.
///
/// Cloning an `EventBus` yields another handle to the same set of listeners
/// and subscribers.
pub struct EventBus<E: ClientEvent + Clone + 'static> {
    inner: Arc<BusInner<E>>,
}

struct BusInner<E: ClientEvent + Clone + 'static> {
    listeners: RwLock<Vec<(ListenerId, BoxedEventListener<E>)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<E>,
}

impl<E: ClientEvent + Clone + 'static> EventBus<E> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::with_listeners(EventListeners::new())
    }

    /// Creates a bus seeded with listeners collected at configuration time.
    pub fn with_listeners(listeners: EventListeners<E>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let bus = Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                sender,
            }),
        };
        for listener in listeners.into_inner() {
            bus.attach(listener);
        }
        bus
    }

    /// Attaches a listener and returns the id needed to detach it.
    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<E> + 'static,
    {
        self.attach(Arc::new(listener))
    }

    fn attach(&self, listener: BoxedEventListener<E>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Detaches a listener. Returns `false` if it was not attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    /// Opens a channel subscription receiving every event emitted from now on.
    ///
    /// Slow subscribers observe `RecvError::Lagged` rather than blocking the
    /// emitter.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.inner.sender.subscribe()
    }

    /// Emits an event to every listener and subscriber.
    ///
    /// The listener list is snapshotted first; no lock is held while user
    /// callbacks run, so a listener may attach or detach listeners itself.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<BoxedEventListener<E>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in &snapshot {
            notify(listener.as_ref(), event);
        }

        // No subscribers is not an error.
        let _ = self.inner.sender.send(event.clone());
    }

    /// Returns the number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl<E: ClientEvent + Clone + 'static> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ClientEvent + Clone + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ClientEvent + Clone + 'static> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish()
    }
}

fn notify<E: ClientEvent>(listener: &dyn EventListener<E>, event: &E) {
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        listener.on_event(event);
    }));
}

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: ClientEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
