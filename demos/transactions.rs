//! Transactional sends across two producers.
//! Run with: cargo run --example transactions

use artemis_client::memory::MemoryTransport;
use artemis_client::{
    ClientError, Connection, ConnectionConfig, Endpoint, Message, RoutingType, Transaction,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let transport = MemoryTransport::new();
    let broker = transport.add_broker(Endpoint::new("localhost", 5672));
    let config = ConnectionConfig::builder()
        .name("transactions-demo")
        .endpoint(Endpoint::new("localhost", 5672))
        .build()?;
    let connection = Connection::connect(transport, config).await?;

    let orders = connection
        .create_producer("orders", RoutingType::Anycast)
        .await?;
    let audit = connection
        .create_producer("audit", RoutingType::Anycast)
        .await?;
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await?;
    let token = CancellationToken::new();

    let transaction = Transaction::new();
    orders
        .send_async(Message::new("foo1"), Some(&transaction), &token)
        .await?;
    audit
        .send_async(Message::new("order foo1 placed"), Some(&transaction), &token)
        .await?;

    // Nothing is visible until the transaction commits.
    let peek = CancellationToken::new();
    let timer = peek.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        timer.cancel();
    });
    match consumer.receive_async(&peek).await {
        Err(ClientError::OperationCancelled) => println!("no message before commit"),
        other => println!("unexpected: {other:?}"),
    }

    transaction.commit_async(&token).await?;
    let message = consumer.receive_async(&token).await?;
    println!("received {:?} after commit", message.body());
    consumer.accept(&message)?;
    println!("audit queue holds {} message(s)", broker.queue_len("audit"));

    connection.dispose_async().await;
    Ok(())
}
