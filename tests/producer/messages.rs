use crate::support::{single_broker, WAIT};
use artemis_client::{
    ClientError, DurabilityMode, Message, ProducerConfig, RoutingType, Value,
    ROUTING_TYPE_ANNOTATION,
};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn send_async_defaults_to_durable() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();

    producer
        .send_async(Message::new("durable"), None, &CancellationToken::new())
        .await
        .unwrap();

    let message = broker.dequeue("orders").unwrap();
    assert_eq!(message.durability_mode, Some(DurabilityMode::Durable));
    assert_eq!(message.properties.to.as_deref(), Some("orders"));
    assert_eq!(message.routing_type(), Some(RoutingType::Anycast));
    assert!(message.properties.creation_time.is_some());
}

#[tokio::test]
async fn fire_and_forget_defaults_to_nondurable() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();

    producer.send(Message::new("quick")).unwrap();

    let message = broker.dequeue("orders").unwrap();
    assert_eq!(message.durability_mode, Some(DurabilityMode::Nondurable));
}

#[tokio::test]
async fn producer_config_fills_unset_fields() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer_with(
            ProducerConfig::new("orders", RoutingType::Anycast)
                .message_durability_mode(DurabilityMode::Nondurable)
                .message_priority(7)
                .set_message_creation_time(false),
        )
        .await
        .unwrap();
    let token = CancellationToken::new();

    producer
        .send_async(Message::new("configured"), None, &token)
        .await
        .unwrap();
    producer
        .send_async(
            Message::new("explicit")
                .with_priority(1)
                .with_durability_mode(DurabilityMode::Durable),
            None,
            &token,
        )
        .await
        .unwrap();

    let configured = broker.dequeue("orders").unwrap();
    assert_eq!(configured.priority, Some(7));
    assert_eq!(configured.durability_mode, Some(DurabilityMode::Nondurable));
    assert!(configured.properties.creation_time.is_none());

    let explicit = broker.dequeue("orders").unwrap();
    assert_eq!(explicit.priority, Some(1));
    assert_eq!(explicit.durability_mode, Some(DurabilityMode::Durable));
}

#[tokio::test]
async fn explicit_creation_time_is_kept() {
    let (_transport, broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let created = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let mut message = Message::new("dated");
    message.properties.creation_time = Some(created);

    producer
        .send_async(message, None, &CancellationToken::new())
        .await
        .unwrap();

    let received = broker.dequeue("orders").unwrap();
    assert_eq!(received.properties.creation_time, Some(created));
}

#[tokio::test]
async fn consumer_sees_what_producer_sent() {
    let (_transport, _broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();

    let mut nested = BTreeMap::new();
    nested.insert("sku".to_string(), Value::from("A-1"));
    nested.insert("quantity".to_string(), Value::from(3u32));
    let mut message = Message::new(Value::Map(nested.clone()))
        .with_property("customer", "acme")
        .with_property("total", 12.5f64)
        .with_property("express", true)
        .with_property("count", 42i64)
        .with_property("note", Option::<String>::None)
        .with_time_to_live(Duration::from_secs(30));
    message.properties.message_id = Some("order-1".to_string());
    message.properties.correlation_id = Some("cart-9".to_string());
    message.properties.subject = Some("new-order".to_string());
    message.properties.content_type = Some("application/json".to_string());

    producer.send_async(message, None, &token).await.unwrap();
    let received = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.body(), &Value::Map(nested));
    assert_eq!(received.property("customer").and_then(Value::as_str), Some("acme"));
    assert_eq!(received.property("total").and_then(Value::as_f64), Some(12.5));
    assert_eq!(received.property("express").and_then(Value::as_bool), Some(true));
    assert_eq!(received.property("count").and_then(Value::as_i64), Some(42));
    assert!(received.property("note").is_some_and(Value::is_null));
    assert_eq!(received.time_to_live, Some(Duration::from_secs(30)));
    assert_eq!(received.properties.message_id.as_deref(), Some("order-1"));
    assert_eq!(received.properties.correlation_id.as_deref(), Some("cart-9"));
    assert_eq!(received.properties.subject.as_deref(), Some("new-order"));
    assert_eq!(
        received.message_annotations.get(ROUTING_TYPE_ANNOTATION),
        Some(&RoutingType::Anycast.annotation())
    );
    assert!(received.delivery_tag().is_some());
    consumer.accept(&received).unwrap();
}

#[tokio::test]
async fn released_delivery_is_redelivered() {
    let (_transport, broker, connection) = single_broker().await;
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    broker.enqueue("orders", Message::new("retry me"));
    let token = CancellationToken::new();

    let first = consumer.receive_async(&token).await.unwrap();
    consumer.release(&first).unwrap();
    let second = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first.delivery_tag(), second.delivery_tag());
    consumer.reject(&second).unwrap();
    assert_eq!(broker.queue_len("orders"), 0);
}

#[tokio::test]
async fn settling_a_message_that_was_never_received() {
    let (_transport, _broker, connection) = single_broker().await;
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();

    let result = consumer.accept(&Message::new("local"));

    assert!(matches!(result, Err(ClientError::NotADelivery)));
}

#[tokio::test]
async fn multicast_reaches_every_subscriber() {
    let (_transport, _broker, connection) = single_broker().await;
    let first = connection
        .create_consumer("news", RoutingType::Multicast)
        .await
        .unwrap();
    let second = connection
        .create_consumer("news", RoutingType::Multicast)
        .await
        .unwrap();
    let producer = connection
        .create_producer("news", RoutingType::Multicast)
        .await
        .unwrap();
    let token = CancellationToken::new();

    producer
        .send_async(Message::new("extra"), None, &token)
        .await
        .unwrap();

    for consumer in [&first, &second] {
        let message = tokio::time::timeout(WAIT, consumer.receive_async(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body().as_str(), Some("extra"));
    }
}

#[tokio::test]
async fn application_property_types_round_trip() {
    let (_transport, _broker, connection) = single_broker().await;
    let producer = connection
        .create_producer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let consumer = connection
        .create_consumer("orders", RoutingType::Anycast)
        .await
        .unwrap();
    let token = CancellationToken::new();

    let timestamp = SystemTime::UNIX_EPOCH + Duration::from_millis(1_234_567_890_123);
    let mut map = BTreeMap::new();
    map.insert("inner".to_string(), Value::List(vec![Value::Int(1), Value::Null]));
    let values = [
        ("bool", Value::Bool(true)),
        ("ubyte", Value::UByte(u8::MAX)),
        ("ushort", Value::UShort(u16::MAX)),
        ("uint", Value::UInt(u32::MAX)),
        ("ulong", Value::ULong(u64::MAX)),
        ("byte", Value::Byte(i8::MIN)),
        ("short", Value::Short(i16::MIN)),
        ("int", Value::Int(i32::MIN)),
        ("long", Value::Long(i64::MIN)),
        ("float", Value::Float(f32::MIN_POSITIVE)),
        ("double", Value::Double(-0.5e-300)),
        ("char", Value::Char('λ')),
        ("string", Value::String("héllo".to_string())),
        ("symbol", Value::Symbol("amqp:symbol".to_string())),
        ("binary", Value::Binary(vec![0, 1, 2, 255])),
        ("timestamp", Value::Timestamp(timestamp)),
        ("uuid", Value::Uuid(*b"0123456789abcdef")),
        ("map", Value::Map(map)),
    ];
    let mut message = Message::new("typed");
    for (key, value) in values.iter().cloned() {
        message = message.with_property(key, value);
    }

    producer.send_async(message, None, &token).await.unwrap();
    let received = tokio::time::timeout(WAIT, consumer.receive_async(&token))
        .await
        .unwrap()
        .unwrap();

    for (key, value) in &values {
        assert_eq!(received.property(key), Some(value), "property {key}");
    }
}
