//! In-process transport and broker for tests and examples.
//!
//! [`MemoryTransport`] routes connection attempts to [`MemoryBroker`]s keyed
//! by endpoint. An endpoint without a broker refuses connections, which makes
//! failover easy to exercise:
//!
//! ```rust,ignore
//! let transport = MemoryTransport::new();
//! let host1 = transport.add_broker(Endpoint::new("host1", 5672));
//! let host2 = transport.add_broker(Endpoint::new("host2", 5672));
//!
//! let connection = Connection::connect(transport.clone(), config).await?;
//! host1.stop(); // the connection fails over to host2
//! ```

mod broker;
mod links;

pub use broker::{BrokerStats, MemoryBroker};

use crate::error::TransportError;
use crate::transport::{Transport, TransportConnection};
use artemis_client_recovery::Endpoint;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A [`Transport`] connecting to in-process brokers.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<TransportInner>,
}

#[derive(Default)]
struct TransportInner {
    brokers: Mutex<HashMap<Endpoint, MemoryBroker>>,
    attempts: Mutex<Vec<Endpoint>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a broker on `endpoint`, replacing any previous one.
    pub fn add_broker(&self, endpoint: Endpoint) -> MemoryBroker {
        let broker = MemoryBroker::new(endpoint.clone());
        self.inner.brokers.lock().insert(endpoint, broker.clone());
        broker
    }

    pub fn broker(&self, endpoint: &Endpoint) -> Option<MemoryBroker> {
        self.inner.brokers.lock().get(endpoint).cloned()
    }

    /// Every endpoint a connection was attempted to, in order.
    pub fn connect_attempts(&self) -> Vec<Endpoint> {
        self.inner.attempts.lock().clone()
    }

    /// Number of connection attempts made to `endpoint`.
    pub fn attempts_to(&self, endpoint: &Endpoint) -> usize {
        self.inner
            .attempts
            .lock()
            .iter()
            .filter(|attempted| *attempted == endpoint)
            .count()
    }
}

impl Transport for MemoryTransport {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<Arc<dyn TransportConnection>, TransportError>> {
        self.inner.attempts.lock().push(endpoint.clone());
        let result = match self.broker(endpoint) {
            Some(broker) => broker.accept(),
            None => Err(TransportError::ConnectionRefused(format!(
                "nothing listening at {}",
                endpoint
            ))),
        };
        futures::future::ready(result).boxed()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("brokers", &self.inner.brokers.lock().len())
            .finish()
    }
}
