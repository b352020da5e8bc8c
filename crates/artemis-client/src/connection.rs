//! The auto-recovering connection.

use crate::config::{ConnectionConfig, ConsumerConfig, ProducerConfig};
use crate::consumer::{self, Consumer};
use crate::error::{ClientError, Result, TransportError};
use crate::events::ConnectionEvent;
use crate::message::RoutingType;
use crate::producer::{self, Producer};
use crate::registry::EntityRegistry;
use crate::transactions::TransactionsManager;
use crate::transport::{CloseReason, Transport, TransportConnection, TransportSlot};
use artemis_client_core::{EventBus, EventListener, FnListener, ListenerId};
use artemis_client_recovery::{
    ConnectionState, ConnectionStateTracker, Endpoint, EndpointSelector, RecoveryPolicy,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

/// A connection that survives transport loss.
///
/// When the transport drops, the connection moves to
/// [`ConnectionState::Recovering`] and reconnects according to its
/// [`RecoveryPolicy`], walking the configured endpoints in order. Once
/// reconnected it reattaches every live producer and consumer, in creation
/// order, before announcing the recovery.
///
/// Dropping the connection stops recovery and closes the transport in the
/// background; call [`dispose_async`](Self::dispose_async) to wait for that.
///
/// # Examples
///
/// ```rust,ignore
/// use artemis_client::{Connection, ConnectionConfig, Endpoint, RecoveryPolicy, RoutingType};
/// use std::time::Duration;
///
/// let config = ConnectionConfig::builder()
///     .endpoint(Endpoint::new("host1", 5672))
///     .endpoint(Endpoint::new("host2", 5672))
///     .recovery_policy(RecoveryPolicy::constant_backoff(Duration::from_millis(100), 10))
///     .on_connection_recovered(|endpoint| println!("recovered on {endpoint}"))
///     .build()?;
///
/// let connection = Connection::connect(transport, config).await?;
/// let producer = connection.create_producer("orders", RoutingType::Anycast).await?;
/// ```
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    transport: Box<dyn Transport>,
    current: Arc<TransportSlot>,
    state: ConnectionStateTracker,
    selector: EndpointSelector,
    policy: RecoveryPolicy,
    automatic_recovery: bool,
    registry: Arc<EntityRegistry>,
    transactions: Arc<TransactionsManager>,
    events: EventBus<ConnectionEvent>,
    shutdown: CancellationToken,
    /// Held shared while creating entities and exclusively while recovery
    /// reattaches them, so no entity misses a recovery.
    topology: RwLock<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connects to the first reachable endpoint.
    ///
    /// With automatic recovery enabled, failed attempts are retried
    /// according to the recovery policy, moving through the endpoints in
    /// order. With it disabled, only the first endpoint is tried.
    pub async fn connect<T>(transport: T, config: ConnectionConfig) -> Result<Self>
    where
        T: Transport,
    {
        let ConnectionConfig {
            name,
            endpoints,
            automatic_recovery_enabled,
            recovery_policy,
            selection_strategy,
            event_listeners,
        } = config;
        let selector = EndpointSelector::with_strategy(endpoints, selection_strategy)
            .map_err(|_| crate::error::ConfigError::NoEndpoints)?;
        let current = Arc::new(TransportSlot::default());

        let shared = Arc::new(Shared {
            transactions: Arc::new(TransactionsManager::new(name.clone(), Arc::clone(&current))),
            name,
            transport: Box::new(transport),
            current,
            state: ConnectionStateTracker::new(),
            selector,
            policy: recovery_policy,
            automatic_recovery: automatic_recovery_enabled,
            registry: Arc::new(EntityRegistry::new()),
            events: EventBus::with_listeners(event_listeners),
            shutdown: CancellationToken::new(),
            topology: RwLock::new(()),
            supervisor: Mutex::new(None),
        });

        let connection = match shared.establish().await {
            Ok(connection) => connection,
            Err(error) => {
                if let Some(from) = shared.state.close() {
                    shared.emit_transition(from, ConnectionState::Closed);
                }

                #[cfg(feature = "tracing")]
                tracing::error!(connection = %shared.name, error = %error, "failed to connect");

                return Err(error);
            }
        };

        shared.current.set(Arc::clone(&connection));
        shared.selector.mark_connected();
        shared.enter(ConnectionState::Open);

        #[cfg(feature = "tracing")]
        tracing::info!(
            connection = %shared.name,
            endpoint = %connection.endpoint(),
            "connection open"
        );

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), connection));
        *shared.supervisor.lock() = Some(supervisor);

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.state()
    }

    /// Returns true while the connection is open.
    pub fn is_opened(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Waits until the connection reaches `state`, or until it closes.
    pub async fn wait_for_state(&self, state: ConnectionState) -> ConnectionState {
        self.shared
            .state
            .wait_for(|current| current == state || current.is_terminal())
            .await
    }

    /// The endpoint of the live transport, if any.
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        self.shared.selector.connected()
    }

    /// Consecutive failed attempts in the ongoing recovery.
    pub fn recovery_attempts(&self) -> u32 {
        self.shared.state.attempts()
    }

    /// Opens a channel receiving every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Attaches an event listener.
    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: EventListener<ConnectionEvent> + 'static,
    {
        self.shared.events.add_listener(listener)
    }

    /// Detaches a listener. Returns false if it was not attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.events.remove_listener(id)
    }

    /// Calls `f` with the endpoint every time the connection recovers.
    pub fn on_connection_recovered<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.add_listener(FnListener::new(move |event: &ConnectionEvent| {
            if let ConnectionEvent::Recovered { endpoint, .. } = event {
                f(endpoint);
            }
        }))
    }

    /// Calls `f` when recovery gives up.
    pub fn on_connection_recovery_error<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.add_listener(FnListener::new(move |event: &ConnectionEvent| {
            if let ConnectionEvent::RecoveryError { error, .. } = event {
                f(error);
            }
        }))
    }

    /// Creates a producer for `address`.
    pub async fn create_producer(
        &self,
        address: impl Into<String>,
        routing_type: RoutingType,
    ) -> Result<Producer> {
        self.create_producer_with(ProducerConfig::new(address, routing_type))
            .await
    }

    /// Creates a producer from a full configuration.
    pub async fn create_producer_with(&self, config: ProducerConfig) -> Result<Producer> {
        config.validate()?;
        let _topology = self.shared.topology.read().await;
        let connection = self.shared.open_transport()?;

        let attachment = producer::attach(connection.as_ref(), &config)
            .await
            .map_err(|source| ClientError::CreateLinkFailed {
                address: config.address.clone(),
                source,
            })?;
        let producer = match Producer::new(
            self.shared.registry.next_id(),
            self.shared.name.clone(),
            config,
            attachment,
            Arc::clone(&self.shared.transactions),
            Arc::downgrade(&self.shared.registry),
        ) {
            Ok(producer) => producer,
            Err(attachment) => {
                attachment.close().await;
                return Err(ClientError::ConnectionClosed);
            }
        };

        if !self.shared.registry.register(producer.entity()) {
            producer.dispose_async().await;
            return Err(ClientError::ConnectionClosed);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            connection = %self.shared.name,
            producer = %producer.id(),
            address = producer.address(),
            "producer created"
        );

        Ok(producer)
    }

    /// Creates a consumer for `address`.
    pub async fn create_consumer(
        &self,
        address: impl Into<String>,
        routing_type: RoutingType,
    ) -> Result<Consumer> {
        self.create_consumer_with(ConsumerConfig::new(address, routing_type))
            .await
    }

    /// Creates a consumer from a full configuration.
    pub async fn create_consumer_with(&self, config: ConsumerConfig) -> Result<Consumer> {
        config.validate()?;
        let _topology = self.shared.topology.read().await;
        let connection = self.shared.open_transport()?;

        let attachment = consumer::attach(connection.as_ref(), &config)
            .await
            .map_err(|source| ClientError::CreateLinkFailed {
                address: config.address.clone(),
                source,
            })?;
        let consumer = match Consumer::new(
            self.shared.registry.next_id(),
            config,
            attachment,
            Arc::downgrade(&self.shared.registry),
        ) {
            Ok(consumer) => consumer,
            Err(attachment) => {
                attachment.close().await;
                return Err(ClientError::ConnectionClosed);
            }
        };

        if !self.shared.registry.register(consumer.entity()) {
            consumer.dispose_async().await;
            return Err(ClientError::ConnectionClosed);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            connection = %self.shared.name,
            consumer = %consumer.id(),
            address = consumer.address(),
            "consumer created"
        );

        Ok(consumer)
    }

    /// Closes the connection and every producer and consumer created on it.
    ///
    /// Recovery stops for good; no recovery events are emitted afterwards.
    pub async fn dispose_async(&self) {
        let shared = &self.shared;
        shared.shutdown.cancel();
        {
            // Serialized with the end of a recovery.
            let _topology = shared.topology.write().await;
            if let Some(from) = shared.state.close() {
                shared.emit_transition(from, ConnectionState::Closed);

                #[cfg(feature = "tracing")]
                tracing::info!(connection = %shared.name, "connection disposed");
            }
        }

        let supervisor = shared.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }

        shared.transactions.close().await;
        for entity in shared.registry.drain() {
            entity.close_link().await;
        }
        if let Some(connection) = shared.current.take() {
            connection.close().await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(from) = self.shared.state.close() {
            self.shared.emit_transition(from, ConnectionState::Closed);
        }
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("endpoint", &self.current_endpoint())
            .field("entities", &self.shared.registry.len())
            .finish()
    }
}

impl Shared {
    /// Makes the initial connection.
    async fn establish(&self) -> Result<Arc<dyn TransportConnection>> {
        if !self.automatic_recovery {
            let endpoint = self.selector.first();
            return self
                .transport
                .connect(&endpoint)
                .await
                .map_err(|source| ClientError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    source,
                });
        }

        loop {
            let endpoint = self.selector.next();
            let error = match self.transport.connect(&endpoint).await {
                Ok(connection) => return Ok(connection),
                Err(error) => error,
            };
            let attempt = self.state.increment_attempts();

            #[cfg(feature = "tracing")]
            tracing::warn!(
                connection = %self.name,
                endpoint = %endpoint,
                attempt,
                error = %error,
                "connection attempt failed"
            );

            match self.policy.next_delay(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(ClientError::ConnectionFailed {
                        endpoint: endpoint.to_string(),
                        source: error,
                    });
                }
            }
        }
    }

    /// Reconnects after transport loss. Returns the new transport, or `None`
    /// if the connection closed instead.
    async fn recover(&self) -> Option<Arc<dyn TransportConnection>> {
        let started = Instant::now();
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            let endpoint = self.selector.next();
            self.events.emit(&ConnectionEvent::RecoveryAttempt {
                connection: self.name.clone(),
                timestamp: Instant::now(),
                attempt: self.state.attempts() + 1,
                endpoint: endpoint.clone(),
            });

            #[cfg(feature = "metrics")]
            counter!("artemis_recovery_attempts_total", "connection" => self.name.clone())
                .increment(1);

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                result = self.transport.connect(&endpoint) => result,
            };
            match result {
                Ok(connection) => {
                    if self.reopen(Arc::clone(&connection), endpoint, started).await {
                        return Some(connection);
                    }
                    connection.close().await;
                    return None;
                }
                Err(error) => {
                    let attempt = self.state.increment_attempts();

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        connection = %self.name,
                        endpoint = %endpoint,
                        attempt,
                        error = %error,
                        "recovery attempt failed"
                    );

                    match self.policy.next_delay(attempt) {
                        Some(delay) => {
                            tokio::select! {
                                _ = self.shutdown.cancelled() => return None,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            self.exhausted(attempt, error);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Installs a new transport, reattaches every live entity and announces
    /// the recovery. Returns false if the connection was disposed first.
    async fn reopen(
        &self,
        connection: Arc<dyn TransportConnection>,
        endpoint: Endpoint,
        started: Instant,
    ) -> bool {
        let _topology = self.topology.write().await;
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.current.set(Arc::clone(&connection));
        self.selector.mark_connected();
        if self.state.transition(ConnectionState::Open).is_err() {
            self.current.take();
            return false;
        }
        self.emit_transition(ConnectionState::Recovering, ConnectionState::Open);

        for entity in self.registry.snapshot() {
            let attached = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                attached = entity.attach(connection.as_ref()) => attached,
            };
            match attached {
                Ok(attachment) => {
                    // Disposed while the new link was being attached.
                    if let Err(attachment) =
                        self.registry.rebind_if_live(entity.as_ref(), attachment)
                    {
                        attachment.close().await;
                    }
                }
                Err(_error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        connection = %self.name,
                        entity = %entity.id(),
                        kind = %entity.kind(),
                        address = entity.address(),
                        error = %_error,
                        "failed to recreate link"
                    );
                }
            }
        }

        // Dispose cancels the token before taking the topology lock.
        if self.shutdown.is_cancelled() || self.state.state() != ConnectionState::Open {
            return false;
        }
        self.recovered(endpoint, started.elapsed());
        true
    }

    fn recovered(&self, endpoint: Endpoint, _duration: Duration) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            connection = %self.name,
            endpoint = %endpoint,
            duration_ms = _duration.as_millis() as u64,
            "connection recovered"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "artemis_connection_recoveries_total",
                "connection" => self.name.clone(),
                "result" => "success"
            )
            .increment(1);
            histogram!("artemis_recovery_duration_seconds", "connection" => self.name.clone())
                .record(_duration.as_secs_f64());
        }

        self.events.emit(&ConnectionEvent::Recovered {
            connection: self.name.clone(),
            timestamp: Instant::now(),
            endpoint,
        });
    }

    fn exhausted(&self, attempts: u32, source: TransportError) {
        if self.shutdown.is_cancelled() || self.state.transition(ConnectionState::Closed).is_err() {
            // Disposed concurrently.
            return;
        }
        self.emit_transition(ConnectionState::Recovering, ConnectionState::Closed);
        let error = ClientError::ConnectionRecoveryExhausted { attempts, source };

        #[cfg(feature = "tracing")]
        tracing::error!(connection = %self.name, error = %error, "connection recovery gave up");

        #[cfg(feature = "metrics")]
        counter!(
            "artemis_connection_recoveries_total",
            "connection" => self.name.clone(),
            "result" => "exhausted"
        )
        .increment(1);

        self.events.emit(&ConnectionEvent::RecoveryError {
            connection: self.name.clone(),
            timestamp: Instant::now(),
            error,
        });
    }

    fn open_transport(&self) -> Result<Arc<dyn TransportConnection>> {
        match self.state.state() {
            ConnectionState::Open => self
                .current
                .get()
                .ok_or(ClientError::ConnectionNotOpen {
                    state: ConnectionState::Recovering,
                }),
            ConnectionState::Closed => Err(ClientError::ConnectionClosed),
            state => Err(ClientError::ConnectionNotOpen { state }),
        }
    }

    fn enter(&self, to: ConnectionState) -> bool {
        match self.state.transition(to) {
            Ok(from) => {
                self.emit_transition(from, to);
                true
            }
            Err(_) => false,
        }
    }

    fn emit_transition(&self, from: ConnectionState, to: ConnectionState) {
        self.events.emit(&ConnectionEvent::StateTransition {
            connection: self.name.clone(),
            timestamp: Instant::now(),
            from,
            to,
        });
    }
}

/// Watches the live transport and drives recovery when it drops.
async fn supervise(shared: Arc<Shared>, mut connection: Arc<dyn TransportConnection>) {
    loop {
        let reason = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            reason = connection.closed() => reason,
        };
        if shared.shutdown.is_cancelled() {
            break;
        }

        let _error = match reason {
            CloseReason::Remote(error) => error,
            CloseReason::Local => TransportError::ConnectionClosed,
        };
        shared.current.take();
        shared.selector.mark_disconnected();
        shared.transactions.invalidate();

        if !shared.automatic_recovery {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                connection = %shared.name,
                error = %_error,
                "connection lost, automatic recovery disabled"
            );
            if let Some(from) = shared.state.close() {
                shared.emit_transition(from, ConnectionState::Closed);
            }
            break;
        }

        if !shared.enter(ConnectionState::Recovering) {
            break;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(connection = %shared.name, error = %_error, "connection lost, recovering");

        match shared.recover().await {
            Some(recovered) => connection = recovered,
            None => break,
        }
    }

    if shared.shutdown.is_cancelled() {
        if let Some(connection) = shared.current.take() {
            connection.close().await;
        }
    }
}
