use crate::error::{ClientError, ConfigError};
use crate::events::ConnectionEvent;
use crate::message::{DurabilityMode, RoutingType};
use artemis_client_core::{EventListeners, FnListener};
use artemis_client_recovery::{ConnectionState, Endpoint, RecoveryPolicy, SelectionStrategy};

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_histogram};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Configuration for an auto-recovering connection.
pub struct ConnectionConfig {
    pub(crate) name: String,
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) automatic_recovery_enabled: bool,
    pub(crate) recovery_policy: RecoveryPolicy,
    pub(crate) selection_strategy: SelectionStrategy,
    pub(crate) event_listeners: EventListeners<ConnectionEvent>,
}

impl ConnectionConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ConnectionConfigBuilder {
        #[cfg(feature = "metrics")]
        {
            METRICS_INIT.call_once(|| {
                describe_counter!(
                    "artemis_recovery_attempts_total",
                    "Total number of reconnect attempts made while recovering"
                );
                describe_counter!(
                    "artemis_connection_recoveries_total",
                    "Total number of recoveries, by result (success or exhausted)"
                );
                describe_histogram!(
                    "artemis_recovery_duration_seconds",
                    "Time from transport loss to a recovered connection"
                );
                describe_counter!(
                    "artemis_messages_sent_total",
                    "Total number of messages sent, by outcome"
                );
                describe_counter!(
                    "artemis_transactions_declared_total",
                    "Total number of transactions declared with the broker"
                );
            });
        }
        ConnectionConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn automatic_recovery_enabled(&self) -> bool {
        self.automatic_recovery_enabled
    }

    pub fn recovery_policy(&self) -> &RecoveryPolicy {
        &self.recovery_policy
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .field("automatic_recovery_enabled", &self.automatic_recovery_enabled)
            .field("recovery_policy", &self.recovery_policy)
            .field("selection_strategy", &self.selection_strategy)
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
pub struct ConnectionConfigBuilder {
    name: String,
    endpoints: Vec<Endpoint>,
    automatic_recovery_enabled: bool,
    recovery_policy: RecoveryPolicy,
    selection_strategy: SelectionStrategy,
    event_listeners: EventListeners<ConnectionEvent>,
}

impl ConnectionConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            endpoints: Vec::new(),
            automatic_recovery_enabled: true,
            recovery_policy: RecoveryPolicy::default(),
            selection_strategy: SelectionStrategy::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Gives this connection a name for observability.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends an endpoint. Endpoints are tried in the order they are added.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Appends several endpoints.
    pub fn endpoints<I>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = Endpoint>,
    {
        self.endpoints.extend(endpoints);
        self
    }

    /// Enables or disables automatic recovery.
    ///
    /// When disabled, only the first endpoint is tried and a lost transport
    /// closes the connection for good.
    ///
    /// Default: true
    pub fn automatic_recovery_enabled(mut self, enabled: bool) -> Self {
        self.automatic_recovery_enabled = enabled;
        self
    }

    /// Sets the policy deciding whether and when to retry.
    ///
    /// Default: exponential backoff from 100ms to 5s, unlimited retries
    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery_policy = policy;
        self
    }

    /// Sets how the next endpoint is chosen.
    ///
    /// Default: round-robin
    pub fn selection_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selection_strategy = strategy;
        self
    }

    /// Registers a callback for when the connection has recovered.
    pub fn on_connection_recovered<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoint) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ConnectionEvent| {
                if let ConnectionEvent::Recovered { endpoint, .. } = event {
                    f(endpoint);
                }
            }));
        self
    }

    /// Registers a callback for when recovery gives up.
    pub fn on_connection_recovery_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ConnectionEvent| {
                if let ConnectionEvent::RecoveryError { error, .. } = event {
                    f(error);
                }
            }));
        self
    }

    /// Registers a callback for state transitions.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ConnectionEvent| {
                if let ConnectionEvent::StateTransition { from, to, .. } = event {
                    f(*from, *to);
                }
            }));
        self
    }

    /// Registers a callback for each reconnect attempt.
    pub fn on_recovery_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &Endpoint) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &ConnectionEvent| {
                if let ConnectionEvent::RecoveryAttempt {
                    attempt, endpoint, ..
                } = event
                {
                    f(*attempt, endpoint);
                }
            }));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(ConnectionConfig {
            name: self.name,
            endpoints: self.endpoints,
            automatic_recovery_enabled: self.automatic_recovery_enabled,
            recovery_policy: self.recovery_policy,
            selection_strategy: self.selection_strategy,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub(crate) address: String,
    pub(crate) routing_type: RoutingType,
    pub(crate) message_durability_mode: Option<DurabilityMode>,
    pub(crate) message_priority: Option<u8>,
    pub(crate) set_message_creation_time: bool,
}

impl ProducerConfig {
    pub fn new(address: impl Into<String>, routing_type: RoutingType) -> Self {
        Self {
            address: address.into(),
            routing_type,
            message_durability_mode: None,
            message_priority: None,
            set_message_creation_time: true,
        }
    }

    /// Durability stamped on messages that do not set their own.
    ///
    /// Default: durable for awaited sends, non-durable for fire-and-forget
    pub fn message_durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.message_durability_mode = Some(mode);
        self
    }

    /// Priority stamped on messages that do not set their own.
    pub fn message_priority(mut self, priority: u8) -> Self {
        self.message_priority = Some(priority);
        self
    }

    /// Whether to stamp a creation time on messages that lack one.
    ///
    /// Default: true
    pub fn set_message_creation_time(mut self, enabled: bool) -> Self {
        self.set_message_creation_time = enabled;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn routing_type(&self) -> RoutingType {
        self.routing_type
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        Ok(())
    }
}

/// Configuration for a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub(crate) address: String,
    pub(crate) routing_type: RoutingType,
    pub(crate) queue: Option<String>,
    pub(crate) credit: u32,
}

impl ConsumerConfig {
    pub fn new(address: impl Into<String>, routing_type: RoutingType) -> Self {
        Self {
            address: address.into(),
            routing_type,
            queue: None,
            credit: 200,
        }
    }

    /// Consumes from a named queue bound to the address.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Link credit granted to the broker.
    ///
    /// Default: 200
    pub fn credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn routing_type(&self) -> RoutingType {
        self.routing_type
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        Ok(())
    }
}
