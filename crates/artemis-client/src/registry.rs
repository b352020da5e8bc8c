//! Tracks the live producers and consumers of a connection so they can be
//! reattached after recovery.

use crate::error::TransportError;
use crate::transport::{ReceiverLink, SenderLink, Session, TransportConnection};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a registered entity. Ids increase with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    Producer,
    Consumer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Producer => f.write_str("producer"),
            EntityKind::Consumer => f.write_str("consumer"),
        }
    }
}

/// A freshly attached link together with the session that owns it.
pub(crate) enum Attachment {
    Sender {
        session: Arc<dyn Session>,
        link: Arc<dyn SenderLink>,
    },
    Receiver {
        session: Arc<dyn Session>,
        link: Arc<dyn ReceiverLink>,
    },
}

impl Attachment {
    pub(crate) async fn close(self) {
        match self {
            Attachment::Sender { session, link } => {
                link.close().await;
                session.close().await;
            }
            Attachment::Receiver { session, link } => {
                link.close().await;
                session.close().await;
            }
        }
    }
}

/// A producer or consumer whose link can be rebuilt on a new transport.
pub(crate) trait RecoverableEntity: Send + Sync {
    fn id(&self) -> EntityId;

    fn kind(&self) -> EntityKind;

    fn address(&self) -> &str;

    fn is_disposed(&self) -> bool;

    /// Flags the entity as disposed. Returns false if it already was.
    fn mark_disposed(&self) -> bool;

    /// Attaches a new link with the entity's original configuration.
    fn attach<'a>(
        &'a self,
        connection: &'a dyn TransportConnection,
    ) -> BoxFuture<'a, Result<Attachment, TransportError>>;

    /// Swaps in a link produced by [`attach`](RecoverableEntity::attach).
    ///
    /// Returns the attachment back if it does not fit this entity.
    fn rebind(&self, attachment: Attachment) -> Result<(), Attachment>;

    /// Closes the current link and its session.
    fn close_link(&self) -> BoxFuture<'_, ()>;
}

/// Registry of live entities, keyed in creation order.
///
/// Disposal and rebinding both happen under the registry lock, so an entity
/// disposed while recovery attaches its replacement link never comes back.
pub(crate) struct EntityRegistry {
    next_id: AtomicU64,
    entries: Mutex<Entries>,
}

struct Entries {
    live: BTreeMap<EntityId, Arc<dyn RecoverableEntity>>,
    closed: bool,
}

impl EntityRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Entries {
                live: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    pub(crate) fn next_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds an entity. Returns false once the registry has been drained.
    pub(crate) fn register(&self, entity: Arc<dyn RecoverableEntity>) -> bool {
        let mut entries = self.entries.lock();
        if entries.closed || entity.is_disposed() {
            return false;
        }
        entries.live.insert(entity.id(), entity);
        true
    }

    /// Marks the entity disposed and removes it.
    pub(crate) fn unregister(&self, id: EntityId) -> Option<Arc<dyn RecoverableEntity>> {
        let mut entries = self.entries.lock();
        let entity = entries.live.remove(&id)?;
        entity.mark_disposed();
        Some(entity)
    }

    /// Live entities in creation order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn RecoverableEntity>> {
        self.entries
            .lock()
            .live
            .values()
            .filter(|entity| !entity.is_disposed())
            .cloned()
            .collect()
    }

    /// Installs a replacement link if the entity is still registered.
    ///
    /// Hands the attachment back when the entity was disposed in the meantime;
    /// the caller must close it.
    pub(crate) fn rebind_if_live(
        &self,
        entity: &dyn RecoverableEntity,
        attachment: Attachment,
    ) -> Result<(), Attachment> {
        let entries = self.entries.lock();
        if entries.closed || entity.is_disposed() || !entries.live.contains_key(&entity.id()) {
            return Err(attachment);
        }
        entity.rebind(attachment)
    }

    /// Disposes every entity and refuses further registrations.
    pub(crate) fn drain(&self) -> Vec<Arc<dyn RecoverableEntity>> {
        let mut entries = self.entries.lock();
        entries.closed = true;
        let drained = std::mem::take(&mut entries.live);
        drained
            .into_values()
            .inspect(|entity| {
                entity.mark_disposed();
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().live.len()
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("live", &self.len())
            .finish()
    }
}
