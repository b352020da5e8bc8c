use super::links::{ConnectionCore, MemoryConnection};
use crate::error::TransportError;
use crate::message::{DeliveryTag, Message, RoutingType};
use crate::outcome::{DeliveryOutcome, ErrorCondition, OutcomeCallback, TransactionalState, TxnId};
use crate::transport::{CloseReason, ControlRequest, TransportConnection};
use artemis_client_recovery::Endpoint;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Counters kept by a [`MemoryBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Connections accepted since the broker was created.
    pub connections: u64,
    pub sender_attaches: u64,
    pub receiver_attaches: u64,
    pub coordinator_attaches: u64,
    pub declares: u64,
    pub discharges: u64,
}

/// An in-process broker listening on one endpoint.
///
/// Supports anycast queues, multicast subscriptions and local transactions.
/// Fault injection covers the cases the client must survive: stopping the
/// broker, dropping connections, rejecting or releasing messages, refusing
/// links, rejecting declares and holding outcomes back.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    pub(super) shared: Arc<BrokerShared>,
}

pub(super) struct BrokerShared {
    endpoint: Endpoint,
    state: Mutex<BrokerState>,
    deliveries: Notify,
}

#[derive(Default)]
struct BrokerState {
    running: bool,
    connections: Vec<Weak<ConnectionCore>>,
    queues: HashMap<String, VecDeque<Message>>,
    subscriptions: HashMap<String, BTreeSet<String>>,
    transactions: HashMap<TxnId, Vec<(String, Message)>>,
    next_txn: u64,
    next_tag: u64,
    rejected_addresses: HashMap<String, ErrorCondition>,
    released_addresses: HashSet<String>,
    refused_links: HashMap<String, ErrorCondition>,
    declare_rejection: Option<ErrorCondition>,
    holding: bool,
    held: Vec<Held>,
    stats: BrokerStats,
}

struct Held {
    link: CancellationToken,
    callback: OutcomeCallback,
    outcome: DeliveryOutcome,
}

impl MemoryBroker {
    pub(super) fn new(endpoint: Endpoint) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                endpoint,
                state: Mutex::new(BrokerState {
                    running: true,
                    ..BrokerState::default()
                }),
                deliveries: Notify::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Stops the broker: open connections are lost and new ones refused.
    ///
    /// Queued messages survive; open transactions are rolled back.
    pub fn stop(&self) {
        self.shared.state.lock().running = false;
        self.shared.sever("broker stopped");
    }

    /// Starts a stopped broker.
    pub fn start(&self) {
        self.shared.state.lock().running = true;
    }

    /// Drops every open connection while continuing to accept new ones.
    pub fn drop_connections(&self) {
        self.shared.sever("connection dropped by broker");
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.connections.retain(|connection| connection.strong_count() > 0);
        state
            .connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|connection| !connection.is_closed())
            .count()
    }

    pub fn stats(&self) -> BrokerStats {
        self.shared.state.lock().stats
    }

    /// Rejects every message sent to `address` from now on.
    pub fn reject_messages_to(&self, address: &str, condition: ErrorCondition) {
        self.shared
            .state
            .lock()
            .rejected_addresses
            .insert(address.to_string(), condition);
    }

    /// Releases every message sent to `address` from now on.
    pub fn release_messages_to(&self, address: &str) {
        self.shared
            .state
            .lock()
            .released_addresses
            .insert(address.to_string());
    }

    /// Undoes [`reject_messages_to`](Self::reject_messages_to) and
    /// [`release_messages_to`](Self::release_messages_to).
    pub fn accept_messages_to(&self, address: &str) {
        let mut state = self.shared.state.lock();
        state.rejected_addresses.remove(address);
        state.released_addresses.remove(address);
    }

    /// Refuses to attach links to `address` from now on.
    pub fn refuse_links_to(&self, address: &str, condition: ErrorCondition) {
        self.shared
            .state
            .lock()
            .refused_links
            .insert(address.to_string(), condition);
    }

    pub fn allow_links_to(&self, address: &str) {
        self.shared.state.lock().refused_links.remove(address);
    }

    /// Rejects declare requests with `condition`, or stops doing so with `None`.
    pub fn reject_declares(&self, condition: Option<ErrorCondition>) {
        self.shared.state.lock().declare_rejection = condition;
    }

    /// While holding, outcomes are kept back until
    /// [`release_held_outcomes`](Self::release_held_outcomes) or until their
    /// link goes away.
    pub fn hold_outcomes(&self, hold: bool) {
        self.shared.state.lock().holding = hold;
    }

    /// Number of outcomes currently held back.
    pub fn held_outcomes(&self) -> usize {
        self.shared.state.lock().held.len()
    }

    /// Delivers every held outcome.
    pub fn release_held_outcomes(&self) {
        let held = std::mem::take(&mut self.shared.state.lock().held);
        for Held {
            link,
            callback,
            outcome,
        } in held
        {
            if link.is_cancelled() {
                callback(DeliveryOutcome::TransportClosed);
            } else {
                callback(outcome);
            }
        }
    }

    /// Puts a message straight onto a queue, bypassing producers.
    pub fn enqueue(&self, queue: &str, message: Message) {
        self.shared
            .state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        self.shared.deliveries.notify_waiters();
    }

    /// Takes the oldest message off a queue.
    pub fn dequeue(&self, queue: &str) -> Option<Message> {
        self.shared
            .state
            .lock()
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Messages sent under open transactions, not yet visible to consumers.
    pub fn pending_transactional_messages(&self) -> usize {
        self.shared
            .state
            .lock()
            .transactions
            .values()
            .map(Vec::len)
            .sum()
    }

    pub(super) fn accept(&self) -> Result<Arc<dyn TransportConnection>, TransportError> {
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(TransportError::ConnectionRefused(format!(
                "broker at {} is not running",
                self.shared.endpoint
            )));
        }
        let core = Arc::new(ConnectionCore::new(Arc::clone(&self.shared)));
        state.connections.push(Arc::downgrade(&core));
        state.stats.connections += 1;
        Ok(Arc::new(MemoryConnection::new(core)))
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("endpoint", &self.shared.endpoint)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

impl BrokerShared {
    pub(super) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Closes every connection with a remote error and fails held outcomes.
    fn sever(&self, reason: &str) {
        let (connections, held) = {
            let mut state = self.state.lock();
            state.transactions.clear();
            let connections = std::mem::take(&mut state.connections);
            let held = std::mem::take(&mut state.held);
            (connections, held)
        };
        let error = TransportError::ConnectionLost(format!("{}: {}", self.endpoint, reason));
        for connection in connections.iter().filter_map(Weak::upgrade) {
            connection.shut(CloseReason::Remote(error.clone()));
        }
        // Links are closed by now, so callers see the closure first.
        for held in held {
            (held.callback)(DeliveryOutcome::TransportClosed);
        }
        self.deliveries.notify_waiters();
    }

    pub(super) fn check_link(&self, address: &str) -> Result<(), TransportError> {
        match self.state.lock().refused_links.get(address) {
            Some(condition) => Err(TransportError::AttachRefused(condition.clone())),
            None => Ok(()),
        }
    }

    pub(super) fn count_sender(&self) {
        self.state.lock().stats.sender_attaches += 1;
    }

    pub(super) fn count_receiver(&self) {
        self.state.lock().stats.receiver_attaches += 1;
    }

    pub(super) fn count_coordinator(&self) {
        self.state.lock().stats.coordinator_attaches += 1;
    }

    pub(super) fn subscribe(&self, address: &str, subscription: &str) {
        self.state
            .lock()
            .subscriptions
            .entry(address.to_string())
            .or_default()
            .insert(subscription.to_string());
    }

    pub(super) fn unsubscribe(&self, address: &str, subscription: &str) {
        let mut state = self.state.lock();
        if let Some(subscriptions) = state.subscriptions.get_mut(address) {
            subscriptions.remove(subscription);
        }
        state.queues.remove(subscription);
    }

    /// Routes a message sent to `address` and returns the broker's verdict.
    pub(super) fn route(
        &self,
        address: &str,
        message: Message,
        transactional_state: Option<&TransactionalState>,
    ) -> DeliveryOutcome {
        let mut state = self.state.lock();
        if let Some(condition) = state.rejected_addresses.get(address) {
            return DeliveryOutcome::Rejected(Some(condition.clone()));
        }
        if state.released_addresses.contains(address) {
            return DeliveryOutcome::Released;
        }
        if let Some(transactional_state) = transactional_state {
            let txn_id = transactional_state.txn_id();
            return match state.transactions.get_mut(txn_id) {
                Some(pending) => {
                    pending.push((address.to_string(), message));
                    DeliveryOutcome::Accepted
                }
                None => DeliveryOutcome::Rejected(Some(unknown_transaction(txn_id))),
            };
        }
        state.deliver(address, message);
        drop(state);
        self.deliveries.notify_waiters();
        DeliveryOutcome::Accepted
    }

    pub(super) fn coordinate(&self, request: ControlRequest) -> DeliveryOutcome {
        let mut state = self.state.lock();
        match request {
            ControlRequest::Declare => {
                state.stats.declares += 1;
                if let Some(condition) = &state.declare_rejection {
                    return DeliveryOutcome::Rejected(Some(condition.clone()));
                }
                state.next_txn += 1;
                let txn_id = TxnId::new(state.next_txn.to_be_bytes().to_vec());
                state.transactions.insert(txn_id.clone(), Vec::new());
                DeliveryOutcome::Declared(txn_id)
            }
            ControlRequest::Discharge { txn_id, fail } => {
                state.stats.discharges += 1;
                let Some(pending) = state.transactions.remove(&txn_id) else {
                    return DeliveryOutcome::Rejected(Some(unknown_transaction(&txn_id)));
                };
                if !fail {
                    for (address, message) in pending {
                        state.deliver(&address, message);
                    }
                    drop(state);
                    self.deliveries.notify_waiters();
                }
                DeliveryOutcome::Accepted
            }
        }
    }

    /// Hands `outcome` to `callback`, or holds it back if the broker is holding.
    pub(super) fn complete(
        &self,
        link: &CancellationToken,
        callback: OutcomeCallback,
        outcome: DeliveryOutcome,
    ) {
        let mut state = self.state.lock();
        if state.holding {
            state.held.push(Held {
                link: link.clone(),
                callback,
                outcome,
            });
            return;
        }
        drop(state);
        callback(outcome);
    }

    pub(super) fn pop(&self, queue: &str) -> Option<(DeliveryTag, Message)> {
        let mut state = self.state.lock();
        let message = state.queues.get_mut(queue)?.pop_front()?;
        state.next_tag += 1;
        Some((DeliveryTag(state.next_tag), message))
    }

    /// Puts unsettled messages back at the head of a queue, preserving order.
    pub(super) fn requeue(&self, queue: &str, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            let queue = state.queues.entry(queue.to_string()).or_default();
            for message in messages.into_iter().rev() {
                queue.push_front(message);
            }
        }
        self.deliveries.notify_waiters();
    }

    pub(super) fn deliveries(&self) -> &Notify {
        &self.deliveries
    }
}

impl BrokerState {
    fn deliver(&mut self, address: &str, message: Message) {
        match message.routing_type() {
            Some(RoutingType::Multicast) => {
                let subscriptions = self.subscriptions.get(address).cloned().unwrap_or_default();
                for subscription in subscriptions {
                    self.queues
                        .entry(subscription)
                        .or_default()
                        .push_back(message.clone());
                }
            }
            _ => self
                .queues
                .entry(address.to_string())
                .or_default()
                .push_back(message),
        }
    }
}

fn unknown_transaction(txn_id: &TxnId) -> ErrorCondition {
    ErrorCondition::new(
        "amqp:transaction:unknown-id",
        Some(format!("unknown transaction {}", txn_id)),
    )
}
