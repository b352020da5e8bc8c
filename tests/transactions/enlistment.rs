use crate::support::{cancel_after, endpoint, fast_config, single_broker};
use artemis_client::{
    ClientError, Connection, CoordinatorError, ErrorCondition, Message, RoutingType, Transaction,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn declared_lazily_on_first_send() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let transaction = Transaction::new();
    assert_eq!(broker.stats().coordinator_attaches, 0);

    producer
        .send_async(Message::new("first"), Some(&transaction), &CancellationToken::new())
        .await
        .unwrap();

    assert!(transaction.is_enlisted());
    assert!(transaction.txn_id().is_some());
    assert_eq!(broker.stats().coordinator_attaches, 1);
    assert_eq!(broker.stats().declares, 1);
}

#[tokio::test]
async fn concurrent_sends_declare_once() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let transaction = Transaction::new();

    let sends = (0..8).map(|i| {
        let producer = producer.clone();
        let transaction = transaction.clone();
        tokio::spawn(async move {
            producer
                .send_async(
                    Message::new(format!("message-{i}")),
                    Some(&transaction),
                    &CancellationToken::new(),
                )
                .await
        })
    });
    for result in futures::future::join_all(sends).await {
        result.unwrap().unwrap();
    }

    assert_eq!(broker.stats().declares, 1);
    assert_eq!(broker.pending_transactional_messages(), 8);
    transaction
        .commit_async(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(broker.queue_len("orders"), 8);
}

#[tokio::test]
async fn rejected_declare_leaves_transaction_reusable() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    broker.reject_declares(Some(ErrorCondition::new(
        "amqp:resource-limit-exceeded",
        Some("too many transactions".to_string()),
    )));

    let result = producer
        .send_async(Message::new("refused"), Some(&transaction), &token)
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Coordinator(CoordinatorError::Rejected(Some(_))))
    ));
    assert!(!transaction.is_enlisted());
    assert_eq!(broker.pending_transactional_messages(), 0);

    broker.reject_declares(None);
    producer
        .send_async(Message::new("accepted"), Some(&transaction), &token)
        .await
        .unwrap();
    assert!(transaction.is_enlisted());
}

#[tokio::test]
async fn cancelled_enlistment_leaves_transaction_unbound() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let transaction = Transaction::new();
    broker.hold_outcomes(true);

    let result = producer
        .send_async(
            Message::new("stuck"),
            Some(&transaction),
            &cancel_after(Duration::from_millis(50)),
        )
        .await;

    assert!(matches!(result, Err(ClientError::OperationCancelled)));
    assert!(!transaction.is_enlisted());
    assert!(!transaction.is_discharged());

    broker.hold_outcomes(false);
    broker.release_held_outcomes();
    producer
        .send_async(Message::new("retried"), Some(&transaction), &CancellationToken::new())
        .await
        .unwrap();
    assert!(transaction.is_enlisted());
    assert_eq!(broker.stats().declares, 2);
}

#[tokio::test]
async fn transaction_is_bound_to_its_connection() {
    let (transport, broker, first) = single_broker().await;
    let second = Connection::connect(
        transport.clone(),
        fast_config(&[endpoint("localhost")]).build().unwrap(),
    )
    .await
    .unwrap();
    let ours = first
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let theirs = second
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let transaction = Transaction::new();
    ours.send_async(Message::new("ours"), Some(&transaction), &token)
        .await
        .unwrap();

    let result = theirs
        .send_async(Message::new("theirs"), Some(&transaction), &token)
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Coordinator(CoordinatorError::ForeignConnection))
    ));
    assert_eq!(broker.pending_transactional_messages(), 1);
}
