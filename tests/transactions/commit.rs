use crate::support::{cancel_after, single_broker, WAIT};
use artemis_client::{ClientError, CoordinatorError, Message, RoutingType, Transaction};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn messages_become_visible_on_commit() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();

    producer
        .send_async(Message::new("foo1"), Some(&transaction), &token)
        .await
        .unwrap();
    producer
        .send_async(Message::new("foo2"), Some(&transaction), &token)
        .await
        .unwrap();

    let early = consumer
        .receive_async(&cancel_after(Duration::from_millis(500)))
        .await;
    assert!(matches!(early, Err(ClientError::OperationCancelled)));
    assert_eq!(broker.pending_transactional_messages(), 2);

    transaction.commit_async(&token).await.unwrap();
    assert!(transaction.is_discharged());

    for expected in ["foo1", "foo2"] {
        let message = tokio::time::timeout(WAIT, consumer.receive_async(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body().as_str(), Some(expected));
        consumer.accept(&message).unwrap();
    }
}

#[tokio::test]
async fn rollback_discards_messages() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();

    producer
        .send_async(Message::new("discarded"), Some(&transaction), &token)
        .await
        .unwrap();
    transaction.rollback_async(&token).await.unwrap();

    assert_eq!(broker.queue_len("orders"), 0);
    assert_eq!(broker.pending_transactional_messages(), 0);
    assert_eq!(broker.stats().discharges, 1);
}

#[tokio::test]
async fn commit_twice_fails() {
    let (_transport, _broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    producer
        .send_async(Message::new("once"), Some(&transaction), &token)
        .await
        .unwrap();

    transaction.commit_async(&token).await.unwrap();
    let again = transaction.commit_async(&token).await;

    assert!(matches!(
        again,
        Err(ClientError::Coordinator(CoordinatorError::AlreadyDischarged))
    ));
}

#[tokio::test]
async fn send_under_discharged_transaction_fails() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    producer
        .send_async(Message::new("committed"), Some(&transaction), &token)
        .await
        .unwrap();
    transaction.commit_async(&token).await.unwrap();

    let late = producer
        .send_async(Message::new("late"), Some(&transaction), &token)
        .await;

    assert!(late.unwrap_err().is_coordinator());
    assert_eq!(broker.queue_len("orders"), 1);
}

#[tokio::test]
async fn unused_transaction_commits_without_declaring() {
    let (_transport, broker, _connection) = single_broker().await;
    let token = CancellationToken::new();
    let transaction = Transaction::new();

    transaction.commit_async(&token).await.unwrap();

    assert!(!transaction.is_enlisted());
    assert_eq!(broker.stats().declares, 0);
    assert_eq!(broker.stats().discharges, 0);
}

#[tokio::test]
async fn independent_transactions_over_one_producer() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let committed = Transaction::new();
    let rolled_back = Transaction::new();

    producer
        .send_async(Message::new("keep"), Some(&committed), &token)
        .await
        .unwrap();
    producer
        .send_async(Message::new("drop"), Some(&rolled_back), &token)
        .await
        .unwrap();
    producer
        .send_async(Message::new("plain"), None, &token)
        .await
        .unwrap();
    assert_ne!(committed.txn_id(), rolled_back.txn_id());
    assert_eq!(broker.queue_len("orders"), 1);

    rolled_back.rollback_async(&token).await.unwrap();
    committed.commit_async(&token).await.unwrap();

    assert_eq!(broker.queue_len("orders"), 2);
    assert_eq!(broker.dequeue("orders").unwrap().body().as_str(), Some("plain"));
    assert_eq!(broker.dequeue("orders").unwrap().body().as_str(), Some("keep"));
    assert_eq!(broker.stats().coordinator_attaches, 1);
}

#[tokio::test]
async fn transaction_spans_producers() {
    let (_transport, broker, connection) = single_broker().await;
    let orders = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let audit = connection
        .create_producer("audit", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();

    orders
        .send_async(Message::new("order"), Some(&transaction), &token)
        .await
        .unwrap();
    audit
        .send_async(Message::new("entry"), Some(&transaction), &token)
        .await
        .unwrap();
    transaction.commit_async(&token).await.unwrap();

    assert_eq!(broker.queue_len("orders"), 1);
    assert_eq!(broker.queue_len("audit"), 1);
    assert_eq!(broker.stats().declares, 1);
}

#[tokio::test]
async fn dispose_rolls_back() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    producer
        .send_async(Message::new("abandoned"), Some(&transaction), &token)
        .await
        .unwrap();

    transaction.dispose_async().await;

    assert!(transaction.is_discharged());
    assert_eq!(broker.pending_transactional_messages(), 0);
    assert_eq!(broker.queue_len("orders"), 0);
}

#[tokio::test]
async fn cancelled_commit_returns_cancelled() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    producer
        .send_async(Message::new("pending"), Some(&transaction), &token)
        .await
        .unwrap();
    broker.hold_outcomes(true);

    let result = transaction
        .commit_async(&cancel_after(Duration::from_millis(50)))
        .await;

    assert!(matches!(result, Err(ClientError::OperationCancelled)));
    broker.hold_outcomes(false);
    broker.release_held_outcomes();
}
