use super::broker::BrokerShared;
use crate::error::TransportError;
use crate::message::{DeliveryTag, Message, RoutingType};
use crate::outcome::{OutcomeCallback, TransactionalState};
use crate::transport::{
    CloseReason, ControlRequest, CoordinatorAttach, CoordinatorLink, Disposition, Link,
    LinkSource, LinkTarget, ReceiverLink, SenderLink, Session, TransportConnection,
    LOCAL_TRANSACTIONS_CAPABILITY,
};
use artemis_client_recovery::Endpoint;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct ConnectionCore {
    broker: Arc<BrokerShared>,
    token: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
}

impl ConnectionCore {
    pub(super) fn new(broker: Arc<BrokerShared>) -> Self {
        Self {
            broker,
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// Ends the connection. The first reason recorded wins.
    pub(super) fn shut(&self, reason: CloseReason) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    pub(super) fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(super) struct MemoryConnection {
    core: Arc<ConnectionCore>,
}

impl MemoryConnection {
    pub(super) fn new(core: Arc<ConnectionCore>) -> Self {
        Self { core }
    }
}

impl TransportConnection for MemoryConnection {
    fn endpoint(&self) -> &Endpoint {
        self.core.broker.endpoint()
    }

    fn open_session(&self) -> BoxFuture<'_, Result<Arc<dyn Session>, TransportError>> {
        let session = if self.core.is_closed() {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(Arc::new(MemorySession {
                broker: Arc::clone(&self.core.broker),
                token: self.core.token.child_token(),
                _connection: Arc::clone(&self.core),
            }) as Arc<dyn Session>)
        };
        futures::future::ready(session).boxed()
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        let core = Arc::clone(&self.core);
        async move {
            core.token.cancelled().await;
            core.reason.lock().clone().unwrap_or(CloseReason::Local)
        }
        .boxed()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.core.shut(CloseReason::Local);
        futures::future::ready(()).boxed()
    }
}

struct MemorySession {
    broker: Arc<BrokerShared>,
    token: CancellationToken,
    /// Keeps the connection reachable by the broker while links are open.
    _connection: Arc<ConnectionCore>,
}

impl MemorySession {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn link(&self, name: String) -> LinkCore {
        LinkCore {
            name,
            token: self.token.child_token(),
        }
    }
}

impl Session for MemorySession {
    fn attach_sender(
        &self,
        name: String,
        target: LinkTarget,
    ) -> BoxFuture<'_, Result<Arc<dyn SenderLink>, TransportError>> {
        let attached = self
            .check_open()
            .and_then(|()| self.broker.check_link(&target.address))
            .map(|()| {
                self.broker.count_sender();
                Arc::new(MemorySenderLink {
                    core: self.link(name),
                    broker: Arc::clone(&self.broker),
                    address: target.address,
                }) as Arc<dyn SenderLink>
            });
        futures::future::ready(attached).boxed()
    }

    fn attach_receiver(
        &self,
        name: String,
        source: LinkSource,
    ) -> BoxFuture<'_, Result<Arc<dyn ReceiverLink>, TransportError>> {
        let attached = self
            .check_open()
            .and_then(|()| self.broker.check_link(&source.address))
            .map(|()| {
                self.broker.count_receiver();
                let multicast = source
                    .capabilities
                    .iter()
                    .any(|capability| capability == RoutingType::Multicast.capability());
                let subscription = multicast.then(|| {
                    let durable = source.queue.is_some();
                    let queue = format!(
                        "{}::{}",
                        source.address,
                        source.queue.as_deref().unwrap_or(&name)
                    );
                    self.broker.subscribe(&source.address, &queue);
                    Subscription {
                        address: source.address.clone(),
                        queue,
                        durable,
                    }
                });
                let queue = subscription
                    .as_ref()
                    .map_or_else(|| source.address.clone(), |s| s.queue.clone());
                Arc::new(MemoryReceiverLink {
                    core: self.link(name),
                    broker: Arc::clone(&self.broker),
                    queue,
                    subscription,
                    unsettled: Mutex::new(BTreeMap::new()),
                }) as Arc<dyn ReceiverLink>
            });
        futures::future::ready(attached).boxed()
    }

    fn attach_coordinator(
        &self,
        attach: CoordinatorAttach,
    ) -> BoxFuture<'_, Result<Arc<dyn CoordinatorLink>, TransportError>> {
        let attached = self.check_open().and_then(|()| {
            if !attach
                .capabilities
                .iter()
                .any(|capability| capability == LOCAL_TRANSACTIONS_CAPABILITY)
            {
                return Err(TransportError::AttachRefused(
                    crate::outcome::ErrorCondition::new(
                        "amqp:not-implemented",
                        Some("only local transactions are supported".to_string()),
                    ),
                ));
            }
            self.broker.count_coordinator();
            Ok(Arc::new(MemoryCoordinatorLink {
                core: self.link(attach.name),
                broker: Arc::clone(&self.broker),
            }) as Arc<dyn CoordinatorLink>)
        });
        futures::future::ready(attached).boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.token.cancel();
        futures::future::ready(()).boxed()
    }
}

struct LinkCore {
    name: String,
    token: CancellationToken,
}

impl LinkCore {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            Err(TransportError::LinkDetached(None))
        } else {
            Ok(())
        }
    }
}

macro_rules! impl_link {
    ($ty:ty) => {
        impl Link for $ty {
            fn name(&self) -> &str {
                &self.core.name
            }

            fn is_detaching(&self) -> bool {
                false
            }

            fn is_closed(&self) -> bool {
                self.core.token.is_cancelled()
            }

            fn close(&self) -> BoxFuture<'_, ()> {
                self.on_close();
                self.core.token.cancel();
                self.broker.deliveries().notify_waiters();
                futures::future::ready(()).boxed()
            }
        }
    };
}

struct MemorySenderLink {
    core: LinkCore,
    broker: Arc<BrokerShared>,
    address: String,
}

impl MemorySenderLink {
    fn on_close(&self) {}
}

impl_link!(MemorySenderLink);

impl SenderLink for MemorySenderLink {
    fn send(
        &self,
        message: Message,
        transactional_state: Option<TransactionalState>,
        on_outcome: Option<OutcomeCallback>,
    ) -> Result<(), TransportError> {
        self.core.check_open()?;
        let outcome = self
            .broker
            .route(&self.address, message, transactional_state.as_ref());
        if let Some(callback) = on_outcome {
            self.broker.complete(&self.core.token, callback, outcome);
        }
        Ok(())
    }
}

struct Subscription {
    address: String,
    queue: String,
    durable: bool,
}

struct MemoryReceiverLink {
    core: LinkCore,
    broker: Arc<BrokerShared>,
    queue: String,
    subscription: Option<Subscription>,
    unsettled: Mutex<BTreeMap<DeliveryTag, Message>>,
}

impl MemoryReceiverLink {
    fn on_close(&self) {
        if self.core.token.is_cancelled() {
            return;
        }
        let unsettled = std::mem::take(&mut *self.unsettled.lock());
        self.broker
            .requeue(&self.queue, unsettled.into_values().collect());
        if let Some(subscription) = &self.subscription {
            if !subscription.durable {
                self.broker
                    .unsubscribe(&subscription.address, &subscription.queue);
            }
        }
    }
}

impl_link!(MemoryReceiverLink);

impl ReceiverLink for MemoryReceiverLink {
    fn receive(&self) -> BoxFuture<'_, Result<Message, TransportError>> {
        async move {
            loop {
                let notified = self.broker.deliveries().notified();
                tokio::pin!(notified);
                // Register before checking the queue so no delivery is missed.
                notified.as_mut().enable();

                self.core.check_open()?;
                if let Some((tag, message)) = self.broker.pop(&self.queue) {
                    self.unsettled.lock().insert(tag, message.clone());
                    return Ok(message.with_delivery_tag(tag));
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = self.core.token.cancelled() => return Err(TransportError::LinkDetached(None)),
                }
            }
        }
        .boxed()
    }

    fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<(), TransportError> {
        self.core.check_open()?;
        let message = self
            .unsettled
            .lock()
            .remove(&tag)
            .ok_or_else(|| TransportError::Other(format!("unknown delivery tag {}", tag.0)))?;
        if disposition == Disposition::Release {
            self.broker.requeue(&self.queue, vec![message]);
        }
        Ok(())
    }
}

struct MemoryCoordinatorLink {
    core: LinkCore,
    broker: Arc<BrokerShared>,
}

impl MemoryCoordinatorLink {
    fn on_close(&self) {}
}

impl_link!(MemoryCoordinatorLink);

impl CoordinatorLink for MemoryCoordinatorLink {
    fn control(
        &self,
        request: ControlRequest,
        on_outcome: OutcomeCallback,
    ) -> Result<(), TransportError> {
        self.core.check_open()?;
        let outcome = self.broker.coordinate(request);
        self.broker.complete(&self.core.token, on_outcome, outcome);
        Ok(())
    }
}
