//! Producers and the send pipeline.

use crate::config::ProducerConfig;
use crate::error::{ClientError, Result, SendErrorCode, TransportError};
use crate::message::{DurabilityMode, Message, RoutingType, ROUTING_TYPE_ANNOTATION};
use crate::outcome::{DeliveryOutcome, OutcomeCallback, TransactionalState};
use crate::registry::{
    Attachment, EntityId, EntityKind, EntityRegistry, RecoverableEntity,
};
use crate::transactions::{Transaction, TransactionsManager};
use crate::transport::{link_name, LinkTarget, SenderLink, Session, TransportConnection};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Sends messages to one address.
///
/// Producers survive connection recovery: their link is reattached with the
/// same configuration once the connection reopens. While it is down, sends
/// fail fast with [`ClientError::ProducerClosed`].
///
/// Cloning a producer yields another handle to the same link.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

pub(crate) struct ProducerInner {
    id: EntityId,
    connection_name: String,
    config: ProducerConfig,
    binding: RwLock<SenderBinding>,
    transactions: Arc<TransactionsManager>,
    registry: Weak<EntityRegistry>,
    disposed: AtomicBool,
}

#[derive(Clone)]
struct SenderBinding {
    session: Arc<dyn Session>,
    link: Arc<dyn SenderLink>,
}

impl Producer {
    pub(crate) fn new(
        id: EntityId,
        connection_name: String,
        config: ProducerConfig,
        attachment: Attachment,
        transactions: Arc<TransactionsManager>,
        registry: Weak<EntityRegistry>,
    ) -> std::result::Result<Self, Attachment> {
        let binding = match attachment {
            Attachment::Sender { session, link } => SenderBinding { session, link },
            other => return Err(other),
        };
        Ok(Self {
            inner: Arc::new(ProducerInner {
                id,
                connection_name,
                config,
                binding: RwLock::new(binding),
                transactions,
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

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    /// Returns true if the producer is disposed or its link is unusable.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disposed() || !self.inner.link().is_usable()
    }

    /// Sends a message and waits for the broker's verdict.
    ///
    /// With a `transaction`, the message becomes visible only once the
    /// transaction commits; the first send under an unbound transaction
    /// declares it. Messages without a durability mode are sent durable.
    ///
    /// Cancelling `cancellation` abandons the wait and returns
    /// [`ClientError::OperationCancelled`]; the broker may still process the
    /// message.
    pub async fn send_async(
        &self,
        message: Message,
        transaction: Option<&Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if cancellation.is_cancelled() {
            return Err(ClientError::OperationCancelled);
        }
        self.inner.ensure_open()?;

        let transactional_state = self
            .inner
            .transactions
            .transactional_state(transaction, cancellation)
            .await?;

        let message = self.inner.prepare(message, DurabilityMode::Durable);
        let (tx, rx) = oneshot::channel();
        let on_outcome: OutcomeCallback = Box::new(move |outcome| {
            // The receiver is gone if the caller was cancelled.
            let _ = tx.send(outcome);
        });

        let link = self.inner.ensure_open()?;
        self.inner
            .submit(&link, message, transactional_state, Some(on_outcome))?;

        let outcome = tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or(DeliveryOutcome::TransportClosed),
            _ = cancellation.cancelled() => {
                self.inner.record("cancelled");
                return Err(ClientError::OperationCancelled);
            }
        };
        self.inner.resolve(link.as_ref(), outcome)
    }

    /// Sends a message without waiting for an outcome.
    ///
    /// Messages without a durability mode are sent non-durable.
    pub fn send(&self, message: Message) -> Result<()> {
        let link = self.inner.ensure_open()?;
        let message = self.inner.prepare(message, DurabilityMode::Nondurable);
        self.inner.submit(&link, message, None, None)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(
            connection = %self.inner.connection_name,
            producer = %self.inner.config.address,
            "message sent"
        );

        Ok(())
    }

    /// Closes the producer. It is not recreated by later recoveries.
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

            #[cfg(feature = "tracing")]
            tracing::debug!(
                connection = %self.inner.connection_name,
                producer = %self.inner.config.address,
                "producer disposed"
            );
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("connection", &self.inner.connection_name)
            .field("address", &self.inner.config.address)
            .field("routing_type", &self.inner.config.routing_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProducerInner {
    fn link(&self) -> Arc<dyn SenderLink> {
        Arc::clone(&self.binding.read().link)
    }

    fn ensure_open(&self) -> Result<Arc<dyn SenderLink>> {
        let link = self.link();
        if self.is_disposed() || !link.is_usable() {
            self.record("closed");
            return Err(ClientError::ProducerClosed { reason: None });
        }
        Ok(link)
    }

    /// Fills in what the message leaves unset and stamps the target address
    /// and routing type.
    fn prepare(&self, mut message: Message, default_durability: DurabilityMode) -> Message {
        if self.config.set_message_creation_time && message.properties.creation_time.is_none() {
            message.properties.creation_time = Some(SystemTime::now());
        }
        if message.priority.is_none() {
            message.priority = self.config.message_priority;
        }
        if message.durability_mode.is_none() {
            message.durability_mode =
                Some(self.config.message_durability_mode.unwrap_or(default_durability));
        }
        message.properties.to = Some(self.config.address.clone());
        message.message_annotations.insert(
            ROUTING_TYPE_ANNOTATION.to_string(),
            self.config.routing_type.annotation(),
        );
        message
    }

    fn submit(
        &self,
        link: &Arc<dyn SenderLink>,
        message: Message,
        transactional_state: Option<TransactionalState>,
        on_outcome: Option<OutcomeCallback>,
    ) -> Result<()> {
        link.send(message, transactional_state, on_outcome)
            .map_err(|error| {
                if link.is_usable() {
                    self.record("failed");
                    ClientError::MessageSendFailed {
                        code: SendErrorCode::InternalError,
                        description: error.to_string(),
                        condition: error.condition().cloned(),
                    }
                } else {
                    self.record("closed");
                    ClientError::ProducerClosed {
                        reason: error.condition().cloned(),
                    }
                }
            })
    }

    /// Maps an outcome to the caller's result. A link that has gone away
    /// takes precedence over anything but acceptance.
    fn resolve(&self, link: &dyn SenderLink, outcome: DeliveryOutcome) -> Result<()> {
        let result = match outcome {
            DeliveryOutcome::Accepted => {
                #[cfg(feature = "tracing")]
                tracing::trace!(
                    connection = %self.connection_name,
                    producer = %self.config.address,
                    "message sent"
                );
                Ok(())
            }
            _ if !link.is_usable() => Err(ClientError::ProducerClosed { reason: None }),
            DeliveryOutcome::Rejected(condition) => Err(ClientError::MessageSendFailed {
                code: SendErrorCode::Rejected,
                description: condition
                    .as_ref()
                    .and_then(|c| c.description.clone())
                    .unwrap_or_else(|| "message was rejected by remote peer".to_string()),
                condition,
            }),
            DeliveryOutcome::Released => Err(ClientError::MessageSendFailed {
                code: SendErrorCode::Released,
                description: "message was released by remote peer".to_string(),
                condition: None,
            }),
            DeliveryOutcome::TransportClosed => Err(ClientError::ProducerClosed { reason: None }),
            other => Err(ClientError::MessageSendFailed {
                code: SendErrorCode::InternalError,
                description: other.to_string(),
                condition: None,
            }),
        };

        let label = match &result {
            Ok(()) => "accepted",
            Err(ClientError::ProducerClosed { .. }) => "closed",
            Err(ClientError::MessageSendFailed {
                code: SendErrorCode::Rejected,
                ..
            }) => "rejected",
            Err(ClientError::MessageSendFailed {
                code: SendErrorCode::Released,
                ..
            }) => "released",
            Err(_) => "failed",
        };
        self.record(label);

        #[cfg(feature = "tracing")]
        if let Err(error) = &result {
            tracing::debug!(
                connection = %self.connection_name,
                producer = %self.config.address,
                error = %error,
                "send failed"
            );
        }

        result
    }

    fn record(&self, _outcome: &'static str) {
        #[cfg(feature = "metrics")]
        counter!(
            "artemis_messages_sent_total",
            "connection" => self.connection_name.clone(),
            "outcome" => _outcome
        )
        .increment(1);
    }
}

/// Opens a session and attaches a sender for `config`.
pub(crate) async fn attach(
    connection: &dyn TransportConnection,
    config: &ProducerConfig,
) -> std::result::Result<Attachment, TransportError> {
    let session = connection.open_session().await?;
    let target = LinkTarget {
        address: config.address.clone(),
        capabilities: vec![config.routing_type.capability().to_string()],
    };
    match session.attach_sender(link_name("producer"), target).await {
        Ok(link) => Ok(Attachment::Sender { session, link }),
        Err(error) => {
            session.close().await;
            Err(error)
        }
    }
}

impl RecoverableEntity for ProducerInner {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Producer
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
            Attachment::Sender { session, link } => {
                *self.binding.write() = SenderBinding { session, link };
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

impl Service<Message> for Producer {
    type Response = ();
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<()>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.is_closed() {
            Poll::Ready(Err(ClientError::ProducerClosed { reason: None }))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let producer = self.clone();
        async move {
            producer
                .send_async(message, None, &CancellationToken::new())
                .await
        }
        .boxed()
    }
}
