//! Consumers.

use crate::config::ConsumerConfig;
use crate::error::{ClientError, Result, TransportError};
use crate::message::{Message, RoutingType};
use crate::registry::{Attachment, EntityId, EntityKind, EntityRegistry, RecoverableEntity};
use crate::transport::{
    link_name, Disposition, LinkSource, ReceiverLink, Session, TransportConnection,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Receives messages from one address.
///
/// Like producers, consumers are reattached after connection recovery.
/// Receives issued while the connection is down fail with
/// [`ClientError::ConsumerClosed`]; messages received before the outage can
/// no longer be settled.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

pub(crate) struct ConsumerInner {
    id: EntityId,
    config: ConsumerConfig,
    binding: RwLock<ReceiverBinding>,
    registry: Weak<EntityRegistry>,
    disposed: AtomicBool,
}

#[derive(Clone)]
struct ReceiverBinding {
    session: Arc<dyn Session>,
    link: Arc<dyn ReceiverLink>,
}

impl Consumer {
    pub(crate) fn new(
        id: EntityId,
        config: ConsumerConfig,
        attachment: Attachment,
        registry: Weak<EntityRegistry>,
    ) -> std::result::Result<Self, Attachment> {
        let binding = match attachment {
            Attachment::Receiver { session, link } => ReceiverBinding { session, link },
            other => return Err(other),
        };
        Ok(Self {
            inner: Arc::new(ConsumerInner {
                id,
                config,
                binding: RwLock::new(binding),
                registry,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn entity(&self) -> Arc<dyn RecoverableEntity> {
        self.inner.clone()
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    pub fn routing_type(&self) -> RoutingType {
        self.inner.config.routing_type
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_disposed() || !self.inner.link().is_usable()
    }

    /// Waits for the next message.
    pub async fn receive_async(&self, cancellation: &CancellationToken) -> Result<Message> {
        if cancellation.is_cancelled() {
            return Err(ClientError::OperationCancelled);
        }
        let link = self.inner.ensure_open()?;

        tokio::select! {
            biased;
            received = link.receive() => received.map_err(|error| self.inner.map_error(link.as_ref(), error)),
            _ = cancellation.cancelled() => Err(ClientError::OperationCancelled),
        }
    }

    /// Acknowledges a received message.
    pub fn accept(&self, message: &Message) -> Result<()> {
        self.settle(message, Disposition::Accept)
    }

    /// Rejects a received message; the broker will not redeliver it.
    pub fn reject(&self, message: &Message) -> Result<()> {
        self.settle(message, Disposition::Reject)
    }

    /// Hands a received message back to the broker for redelivery.
    pub fn release(&self, message: &Message) -> Result<()> {
        self.settle(message, Disposition::Release)
    }

    fn settle(&self, message: &Message, disposition: Disposition) -> Result<()> {
        let tag = message.delivery_tag().ok_or(ClientError::NotADelivery)?;
        let link = self.inner.ensure_open()?;
        link.settle(tag, disposition)
            .map_err(|error| self.inner.map_error(link.as_ref(), error))
    }

    /// Closes the consumer. It is not recreated by later recoveries.
    pub async fn dispose_async(&self) {
        let unregistered = self
            .inner
            .registry
            .upgrade()
            .and_then(|registry| registry.unregister(self.inner.id))
            .is_some();
        let newly_disposed = self.inner.mark_disposed();
        if unregistered || newly_disposed {
            self.inner.close_link().await;
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("address", &self.inner.config.address)
            .field("queue", &self.inner.config.queue)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConsumerInner {
    fn link(&self) -> Arc<dyn ReceiverLink> {
        Arc::clone(&self.binding.read().link)
    }

    fn ensure_open(&self) -> Result<Arc<dyn ReceiverLink>> {
        let link = self.link();
        if self.is_disposed() || !link.is_usable() {
            return Err(ClientError::ConsumerClosed { reason: None });
        }
        Ok(link)
    }

    fn map_error(&self, link: &dyn ReceiverLink, error: TransportError) -> ClientError {
        if self.is_disposed() || !link.is_usable() {
            ClientError::ConsumerClosed {
                reason: error.condition().cloned(),
            }
        } else {
            ClientError::Transport(error)
        }
    }
}

/// Opens a session and attaches a receiver for `config`.
pub(crate) async fn attach(
    connection: &dyn TransportConnection,
    config: &ConsumerConfig,
) -> std::result::Result<Attachment, TransportError> {
    let session = connection.open_session().await?;
    let source = LinkSource {
        address: config.address.clone(),
        capabilities: vec![config.routing_type.capability().to_string()],
        queue: config.queue.clone(),
        credit: config.credit,
    };
    match session.attach_receiver(link_name("consumer"), source).await {
        Ok(link) => Ok(Attachment::Receiver { session, link }),
        Err(error) => {
            session.close().await;
            Err(error)
        }
    }
}

impl RecoverableEntity for ConsumerInner {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Consumer
    }

    fn address(&self) -> &str {
        &self.config.address
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    fn attach<'a>(
        &'a self,
        connection: &'a dyn TransportConnection,
    ) -> BoxFuture<'a, std::result::Result<Attachment, TransportError>> {
        attach(connection, &self.config).boxed()
    }

    fn rebind(&self, attachment: Attachment) -> std::result::Result<(), Attachment> {
        match attachment {
            Attachment::Receiver { session, link } => {
                *self.binding.write() = ReceiverBinding { session, link };
                Ok(())
            }
            other => Err(other),
        }
    }

    fn close_link(&self) -> BoxFuture<'_, ()> {
        let binding = self.binding.read().clone();
        async move {
            binding.link.close().await;
            binding.session.close().await;
        }
        .boxed()
    }
}
