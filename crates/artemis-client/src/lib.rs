//! A self-healing AMQP 1.0 client for ActiveMQ Artemis style brokers.
//!
//! The client keeps producers, consumers and transactions usable across
//! broker restarts and failover:
//!
//! - [`Connection`] reconnects according to a [`RecoveryPolicy`], walking an
//!   ordered list of [`Endpoint`]s, and reattaches every live producer and
//!   consumer before announcing the recovery
//! - [`Producer`] sends messages and maps broker outcomes to typed errors;
//!   it also implements [`tower_service::Service`]
//! - [`Transaction`]s are declared lazily on first use and shared by every
//!   producer of a connection
//!
//! The wire protocol lives behind the [`transport`] traits. With the
//! `test-util` feature, [`memory`] provides an in-process broker.
//!
//! # Feature Flags
//!
//! - `tracing` (default): structured logs through the `tracing` crate
//! - `metrics`: counters through the `metrics` crate
//! - `test-util`: the in-memory transport
//!
//! # Example
//!
//! ```rust,ignore
//! use artemis_client::memory::MemoryTransport;
//! use artemis_client::{Connection, ConnectionConfig, Endpoint, Message, RoutingType, Transaction};
//! use tokio_util::sync::CancellationToken;
//!
//! let transport = MemoryTransport::new();
//! transport.add_broker(Endpoint::new("localhost", 5672));
//!
//! let config = ConnectionConfig::builder()
//!     .endpoint(Endpoint::new("localhost", 5672))
//!     .build()?;
//! let connection = Connection::connect(transport, config).await?;
//! let producer = connection.create_producer("orders", RoutingType::Anycast).await?;
//!
//! let token = CancellationToken::new();
//! let transaction = Transaction::new();
//! producer.send_async(Message::new("foo1"), Some(&transaction), &token).await?;
//! producer.send_async(Message::new("foo2"), Some(&transaction), &token).await?;
//! transaction.commit_async(&token).await?;
//! ```

mod config;
mod connection;
mod consumer;
mod error;
mod events;
mod message;
mod outcome;
mod producer;
mod registry;
mod transactions;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, ConsumerConfig, ProducerConfig};
pub use connection::Connection;
pub use consumer::Consumer;
pub use error::{ClientError, ConfigError, CoordinatorError, Result, SendErrorCode, TransportError};
pub use events::ConnectionEvent;
pub use message::{
    DeliveryTag, DurabilityMode, Message, Properties, RoutingType, Value, ROUTING_TYPE_ANNOTATION,
};
pub use outcome::{DeliveryOutcome, ErrorCondition, OutcomeCallback, TransactionalState, TxnId};
pub use producer::Producer;
pub use registry::EntityId;
pub use transactions::Transaction;
pub use transport::CloseReason;

pub use artemis_client_core::{ClientEvent, EventListener, FnListener, ListenerId};
pub use artemis_client_recovery::{
    ConnectionState, Endpoint, EndpointParseError, IntervalFunction, RecoveryPolicy, Scheme,
    SelectionStrategy,
};
