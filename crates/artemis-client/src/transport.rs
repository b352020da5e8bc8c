//! The seam between the client and an AMQP 1.0 protocol engine.
//!
//! The client never speaks the wire protocol itself. It drives a
//! [`Transport`] that opens connections, sessions and links, and reports
//! delivery outcomes through [`OutcomeCallback`]s. Implementations must
//! invoke every callback they accept at most once, and should invoke pending
//! callbacks with [`DeliveryOutcome::TransportClosed`] when a link goes away.
//!
//! [`DeliveryOutcome::TransportClosed`]: crate::outcome::DeliveryOutcome::TransportClosed

use crate::error::TransportError;
use crate::message::{DeliveryTag, Message};
use crate::outcome::{OutcomeCallback, TransactionalState, TxnId};
use artemis_client_recovery::Endpoint;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Capability a coordinator must offer for local transactions.
pub const LOCAL_TRANSACTIONS_CAPABILITY: &str = "amqp:local-transactions";

/// Opens connections to endpoints.
pub trait Transport: Send + Sync + 'static {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<Arc<dyn TransportConnection>, TransportError>>;
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by this side.
    Local,
    /// Closed by the peer or lost in the network.
    Remote(TransportError),
}

/// An established connection.
pub trait TransportConnection: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    fn open_session(&self) -> BoxFuture<'_, Result<Arc<dyn Session>, TransportError>>;

    /// Resolves once the connection has ended, for whatever reason.
    fn closed(&self) -> BoxFuture<'static, CloseReason>;

    fn is_closed(&self) -> bool;

    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Target terminus of a sending link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub address: String,
    pub capabilities: Vec<String>,
}

/// Source terminus of a receiving link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSource {
    pub address: String,
    pub capabilities: Vec<String>,
    /// Fully qualified queue to consume from, if not the address itself.
    pub queue: Option<String>,
    pub credit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    First,
    Second,
}

/// Parameters for attaching a transaction coordinator link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorAttach {
    pub name: String,
    pub capabilities: Vec<String>,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
}

impl CoordinatorAttach {
    /// A coordinator for local transactions, with unsettled sends so that
    /// every control message gets an outcome.
    pub fn local_transactions(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: vec![LOCAL_TRANSACTIONS_CAPABILITY.to_string()],
            snd_settle_mode: SenderSettleMode::Unsettled,
            rcv_settle_mode: ReceiverSettleMode::First,
        }
    }
}

/// A session within a connection.
pub trait Session: Send + Sync {
    fn attach_sender(
        &self,
        name: String,
        target: LinkTarget,
    ) -> BoxFuture<'_, Result<Arc<dyn SenderLink>, TransportError>>;

    fn attach_receiver(
        &self,
        name: String,
        source: LinkSource,
    ) -> BoxFuture<'_, Result<Arc<dyn ReceiverLink>, TransportError>>;

    fn attach_coordinator(
        &self,
        attach: CoordinatorAttach,
    ) -> BoxFuture<'_, Result<Arc<dyn CoordinatorLink>, TransportError>>;

    fn close(&self) -> BoxFuture<'_, ()>;
}

/// State common to every link.
pub trait Link: Send + Sync {
    fn name(&self) -> &str;

    fn is_detaching(&self) -> bool;

    fn is_closed(&self) -> bool;

    fn close(&self) -> BoxFuture<'_, ()>;

    /// Neither detaching nor closed.
    fn is_usable(&self) -> bool {
        !self.is_detaching() && !self.is_closed()
    }
}

pub trait SenderLink: Link {
    /// Submits a message. `on_outcome`, when given, receives the broker's
    /// verdict; without it the message is sent pre-settled.
    fn send(
        &self,
        message: Message,
        transactional_state: Option<TransactionalState>,
        on_outcome: Option<OutcomeCallback>,
    ) -> Result<(), TransportError>;
}

/// Settlement applied to a received delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accept,
    Reject,
    Release,
}

pub trait ReceiverLink: Link {
    /// Waits for the next delivery. The returned message carries its
    /// [`DeliveryTag`].
    fn receive(&self) -> BoxFuture<'_, Result<Message, TransportError>>;

    fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<(), TransportError>;
}

/// Control messages understood by a transaction coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Declare,
    /// `fail = false` commits, `fail = true` rolls back.
    Discharge { txn_id: TxnId, fail: bool },
}

pub trait CoordinatorLink: Link {
    fn control(
        &self,
        request: ControlRequest,
        on_outcome: OutcomeCallback,
    ) -> Result<(), TransportError>;
}

/// Generates a link name unique within the process, e.g. `producer-3f9c0a1b2d4e5f60`.
pub(crate) fn link_name(prefix: &str) -> String {
    format!("{}-{:016x}", prefix, rand::random::<u64>())
}

/// The live transport of a connection, empty while recovering or closed.
#[derive(Default)]
pub(crate) struct TransportSlot {
    current: parking_lot::RwLock<Option<Arc<dyn TransportConnection>>>,
}

impl TransportSlot {
    pub(crate) fn get(&self) -> Option<Arc<dyn TransportConnection>> {
        self.current.read().clone()
    }

    pub(crate) fn set(&self, connection: Arc<dyn TransportConnection>) {
        *self.current.write() = Some(connection);
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn TransportConnection>> {
        self.current.write().take()
    }
}
