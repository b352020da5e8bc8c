//! Failover between two in-process brokers.
//! Run with: cargo run --example failover

use artemis_client::memory::MemoryTransport;
use artemis_client::{
    Connection, ConnectionConfig, ConnectionEvent, Endpoint, Message, RecoveryPolicy, RoutingType,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let transport = MemoryTransport::new();
    let primary = transport.add_broker(Endpoint::new("primary", 5672));
    let backup = transport.add_broker(Endpoint::new("backup", 5672));

    let config = ConnectionConfig::builder()
        .name("failover-demo")
        .endpoint(Endpoint::new("primary", 5672))
        .endpoint(Endpoint::new("backup", 5672))
        .recovery_policy(RecoveryPolicy::exponential_backoff(
            Duration::from_millis(50),
            Duration::from_secs(1),
            10,
        ))
        .on_state_transition(|from, to| println!("state: {from} -> {to}"))
        .on_recovery_attempt(|attempt, endpoint| println!("attempt {attempt} on {endpoint}"))
        .on_connection_recovered(|endpoint| println!("recovered on {endpoint}"))
        .build()?;

    let connection = Connection::connect(transport, config).await?;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await?;
    let token = CancellationToken::new();

    producer
        .send_async(Message::new("before failover"), None, &token)
        .await?;
    println!("primary holds {} message(s)", primary.queue_len("orders"));

    let mut events = connection.subscribe();
    primary.stop();
    while let Ok(event) = events.recv().await {
        if matches!(event, ConnectionEvent::Recovered { .. }) {
            break;
        }
    }

    // The producer was reattached to the backup broker.
    producer
        .send_async(Message::new("after failover"), None, &token)
        .await?;
    println!("backup holds {} message(s)", backup.queue_len("orders"));

    connection.dispose_async().await;
    Ok(())
}
