//! Shared helpers for the integration suites.

#![allow(dead_code)]

use artemis_client::memory::{MemoryBroker, MemoryTransport};
use artemis_client::transport::{Session, Transport, TransportConnection};
use artemis_client::{
    CloseReason, Connection, ConnectionConfig, ConnectionConfigBuilder, ConnectionEvent, Endpoint,
    RecoveryPolicy, TransportError,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn endpoint(host: &str) -> Endpoint {
    Endpoint::new(host, 5672)
}

/// A builder with fast retries, suitable for most tests.
pub fn fast_config(endpoints: &[Endpoint]) -> ConnectionConfigBuilder {
    ConnectionConfig::builder()
        .name("test-connection")
        .endpoints(endpoints.iter().cloned())
        .recovery_policy(RecoveryPolicy::constant_backoff(
            Duration::from_millis(10),
            50,
        ))
}

/// One broker on `localhost` and an open connection to it.
pub async fn single_broker() -> (MemoryTransport, MemoryBroker, Connection) {
    let transport = MemoryTransport::new();
    let broker = transport.add_broker(endpoint("localhost"));
    let config = fast_config(&[endpoint("localhost")]).build().unwrap();
    let connection = Connection::connect(transport.clone(), config)
        .await
        .unwrap();
    (transport, broker, connection)
}

/// Waits for the first event matching `predicate`.
pub async fn next_event<F>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    mut predicate: F,
) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn recovered(events: &mut broadcast::Receiver<ConnectionEvent>) -> Endpoint {
    match next_event(events, |event| {
        matches!(event, ConnectionEvent::Recovered { .. })
    })
    .await
    {
        ConnectionEvent::Recovered { endpoint, .. } => endpoint,
        _ => unreachable!(),
    }
}

/// Events already delivered, without waiting.
pub fn drain(events: &mut broadcast::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Polls `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// A token that cancels itself after `delay`.
pub fn cancel_after(delay: Duration) -> tokio_util::sync::CancellationToken {
    let token = tokio_util::sync::CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        cancel.cancel();
    });
    token
}

/// Holds session opens while shut, so a test can act in the middle of
/// link creation.
#[derive(Clone)]
pub struct Gate {
    shut: Arc<watch::Sender<bool>>,
    waiting: Arc<AtomicUsize>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            shut: Arc::new(watch::Sender::new(false)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn shut(&self) {
        self.shut.send_replace(true);
    }

    pub fn open(&self) {
        self.shut.send_replace(false);
    }

    /// Session opens currently held.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn pass(&self) {
        let mut receiver = self.shut.subscribe();
        if *receiver.borrow_and_update() {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _ = receiver.wait_for(|shut| !*shut).await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A [`MemoryTransport`] whose connections open sessions through a [`Gate`].
#[derive(Clone)]
pub struct GatedTransport {
    inner: MemoryTransport,
    gate: Gate,
}

impl GatedTransport {
    pub fn new(inner: MemoryTransport, gate: Gate) -> Self {
        Self { inner, gate }
    }
}

impl Transport for GatedTransport {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> BoxFuture<'static, Result<Arc<dyn TransportConnection>, TransportError>> {
        let connect = self.inner.connect(endpoint);
        let gate = self.gate.clone();
        async move {
            let inner = connect.await?;
            Ok(Arc::new(GatedConnection { inner, gate }) as Arc<dyn TransportConnection>)
        }
        .boxed()
    }
}

struct GatedConnection {
    inner: Arc<dyn TransportConnection>,
    gate: Gate,
}

impl TransportConnection for GatedConnection {
    fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }

    fn open_session(&self) -> BoxFuture<'_, Result<Arc<dyn Session>, TransportError>> {
        async move {
            self.gate.pass().await;
            self.inner.open_session().await
        }
        .boxed()
    }

    fn closed(&self) -> BoxFuture<'static, CloseReason> {
        self.inner.closed()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.inner.close()
    }
}
