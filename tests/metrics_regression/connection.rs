//! Connection recovery metrics regression tests

use super::helpers::*;
use crate::support::{endpoint, fast_config, next_event, recovered};
use artemis_client::memory::MemoryTransport;
use artemis_client::{Connection, ConnectionEvent, RecoveryPolicy};
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn recovery_metrics_exist() {
    init_recorder();

    let transport = MemoryTransport::new();
    let broker = transport.add_broker(endpoint("localhost"));
    let config = fast_config(&[endpoint("localhost")])
        .name("metrics-recovery")
        .build()
        .unwrap();
    let connection = Connection::connect(transport, config).await.unwrap();
    let mut events = connection.subscribe();

    broker.drop_connections();
    recovered(&mut events).await;

    assert_counter_exists("artemis_recovery_attempts_total");
    assert_metric_has_label(
        "artemis_recovery_attempts_total",
        "connection",
        "metrics-recovery",
    );

    assert_counter_exists("artemis_connection_recoveries_total");
    assert_metric_has_label(
        "artemis_connection_recoveries_total",
        "connection",
        "metrics-recovery",
    );
    assert_metric_has_label("artemis_connection_recoveries_total", "result", "success");

    assert_histogram_exists("artemis_recovery_duration_seconds");
    assert_metric_has_label(
        "artemis_recovery_duration_seconds",
        "connection",
        "metrics-recovery",
    );
}

#[tokio::test]
#[serial]
async fn exhausted_recovery_is_recorded() {
    init_recorder();

    let transport = MemoryTransport::new();
    let broker = transport.add_broker(endpoint("localhost"));
    let config = fast_config(&[endpoint("localhost")])
        .name("metrics-exhausted")
        .recovery_policy(RecoveryPolicy::constant_backoff(Duration::from_millis(1), 1))
        .build()
        .unwrap();
    let connection = Connection::connect(transport, config).await.unwrap();
    let mut events = connection.subscribe();

    broker.stop();
    next_event(&mut events, |event| {
        matches!(event, ConnectionEvent::RecoveryError { .. })
    })
    .await;

    assert_metric_has_label(
        "artemis_connection_recoveries_total",
        "connection",
        "metrics-exhausted",
    );
    assert_metric_has_label("artemis_connection_recoveries_total", "result", "exhausted");
}
