use crate::support::{
    drain, endpoint, eventually, fast_config, recovered, single_broker, Gate, GatedTransport, WAIT,
};
use artemis_client::memory::{MemoryBroker, MemoryTransport};
use artemis_client::{
    ClientError, Connection, ConnectionEvent, ConnectionState, ConsumerConfig, Message,
    RecoveryPolicy, RoutingType,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn producers_and_consumers_are_reattached() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let mut events = connection.subscribe();

    broker.drop_connections();
    assert!(producer.is_closed());
    recovered(&mut events).await;

    let stats = broker.stats();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.sender_attaches, 2);
    assert_eq!(stats.receiver_attaches, 2);
    assert!(!producer.is_closed());
    assert!(!consumer.is_closed());

    let token = CancellationToken::new();
    producer
        .send_async(Message::new("after recovery"), None, &token)
        .await
        .unwrap();
    let received = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.body().as_str(), Some("after recovery"));
    consumer.accept(&received).unwrap();
}

#[tokio::test]
async fn disposed_entities_are_not_reattached() {
    let (_transport, broker, connection) = single_broker().await;
    let kept = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let disposed = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    disposed.dispose_async().await;
    consumer.dispose_async().await;
    let mut events = connection.subscribe();

    broker.drop_connections();
    recovered(&mut events).await;

    let stats = broker.stats();
    assert_eq!(stats.sender_attaches, 3);
    assert_eq!(stats.receiver_attaches, 1);
    assert!(!kept.is_closed());
    assert!(disposed.is_closed());
    assert!(consumer.is_closed());
}

#[tokio::test]
async fn entity_that_cannot_be_reattached_does_not_block_recovery() {
    let (_transport, broker, connection) = single_broker().await;
    let orders = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let audit = connection
        .create_producer("audit", RoutingType::Anycast)
        .await
        .unwrap();
    let mut events = connection.subscribe();

    broker.refuse_links_to(
        "orders",
        artemis_client::ErrorCondition::new("amqp:not-found", None),
    );
    broker.drop_connections();
    recovered(&mut events).await;

    assert!(orders.is_closed());
    assert!(!audit.is_closed());
}

#[tokio::test]
async fn create_while_recovering_fails() {
    let transport = MemoryTransport::new();
    let broker = transport.add_broker(endpoint("localhost"));
    let config = fast_config(&[endpoint("localhost")])
        .recovery_policy(RecoveryPolicy::constant_backoff(Duration::from_millis(20), 500))
        .build()
        .unwrap();
    let connection = Connection::connect(transport, config).await.unwrap();
    let mut events = connection.subscribe();

    broker.stop();
    let state = tokio::time::timeout(WAIT, connection.wait_for_state(ConnectionState::Recovering))
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Recovering);

    let result = connection
        .create_producer("orders", RoutingType::Anycast)
        .await;
    assert!(matches!(
        result,
        Err(ClientError::ConnectionNotOpen {
            state: ConnectionState::Recovering
        })
    ));

    broker.start();
    recovered(&mut events).await;
    assert!(connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .is_ok());
}

#[tokio::test]
async fn unsettled_deliveries_are_redelivered_after_recovery() {
    let (_transport, broker, connection) = single_broker().await;
    let consumer = connection
        .create_consumer_with(ConsumerConfig::new("orders", RoutingType::Anycast).credit(10))
        .await
        .unwrap();
    broker.enqueue("orders", Message::new("first"));
    let token = CancellationToken::new();
    let first = consumer.receive_async(&token).await.unwrap();
    assert_eq!(first.body().as_str(), Some("first"));

    consumer.release(&first).unwrap();
    eventually(|| broker.queue_len("orders") == 1).await;
    let mut events = connection.subscribe();
    broker.drop_connections();
    recovered(&mut events).await;

    let again = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.body().as_str(), Some("first"));
}

#[tokio::test]
async fn multicast_consumers_keep_their_subscription() {
    let (_transport, broker, connection) = single_broker().await;
    let consumer = connection
        .create_consumer_with(ConsumerConfig::new("news", RoutingType::Multicast).queue("reader"))
        .await
        .unwrap();
    let producer = connection
        .create_producer("news", RoutingType::Multicast)
        .await
        .unwrap();
    let mut events = connection.subscribe();

    broker.drop_connections();
    recovered(&mut events).await;

    let token = CancellationToken::new();
    producer
        .send_async(Message::new("headline"), None, &token)
        .await
        .unwrap();
    let received = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.body().as_str(), Some("headline"));
    assert_eq!(received.routing_type(), Some(RoutingType::Multicast));
}

async fn gated_broker(gate: &Gate) -> (MemoryBroker, Connection) {
    let transport = MemoryTransport::new();
    let broker = transport.add_broker(endpoint("localhost"));
    let config = fast_config(&[endpoint("localhost")]).build().unwrap();
    let connection = Connection::connect(GatedTransport::new(transport, gate.clone()), config)
        .await
        .unwrap();
    (broker, connection)
}

#[tokio::test]
async fn producer_disposed_during_reattach_stays_closed() {
    let gate = Gate::new();
    let (broker, connection) = gated_broker(&gate).await;
    let disposed = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let kept = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let mut events = connection.subscribe();

    gate.shut();
    broker.drop_connections();
    eventually(|| gate.waiting() == 1).await;
    disposed.dispose_async().await;
    gate.open();
    recovered(&mut events).await;

    // Both were reattached, but the disposed one's new link was discarded.
    assert_eq!(broker.stats().sender_attaches, 4);
    assert!(disposed.is_closed());
    assert!(matches!(
        disposed.send(Message::new("late")),
        Err(ClientError::ProducerClosed { .. })
    ));
    assert!(!kept.is_closed());
    kept.send_async(Message::new("kept"), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(broker.queue_len("orders"), 1);
}

#[tokio::test]
async fn dispose_during_reattach_does_not_announce_recovery() {
    let gate = Gate::new();
    let (broker, connection) = gated_broker(&gate).await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let mut events = connection.subscribe();

    gate.shut();
    broker.drop_connections();
    eventually(|| gate.waiting() == 1).await;
    assert_eq!(connection.state(), ConnectionState::Open);

    tokio::time::timeout(WAIT, connection.dispose_async())
        .await
        .expect("dispose waited on the blocked reattach");
    gate.open();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(producer.is_closed());
    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        ConnectionEvent::StateTransition {
            from: ConnectionState::Open,
            to: ConnectionState::Closed,
            ..
        }
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        ConnectionEvent::Recovered { .. } | ConnectionEvent::RecoveryError { .. }
    )));
}
