//! Events emitted by an auto-recovering connection.

use crate::error::ClientError;
use artemis_client_core::ClientEvent;
use artemis_client_recovery::{ConnectionState, Endpoint};
use std::time::Instant;

/// Events emitted by a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection changed state.
    StateTransition {
        connection: String,
        timestamp: Instant,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A reconnect attempt is about to be made.
    RecoveryAttempt {
        connection: String,
        timestamp: Instant,
        /// 1-based attempt number within the current recovery.
        attempt: u32,
        endpoint: Endpoint,
    },
    /// The connection recovered and its producers and consumers were reattached.
    Recovered {
        connection: String,
        timestamp: Instant,
        endpoint: Endpoint,
    },
    /// Recovery gave up; the connection is now closed.
    RecoveryError {
        connection: String,
        timestamp: Instant,
        error: ClientError,
    },
}

impl ClientEvent for ConnectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ConnectionEvent::StateTransition { .. } => "state_transition",
            ConnectionEvent::RecoveryAttempt { .. } => "recovery_attempt",
            ConnectionEvent::Recovered { .. } => "recovered",
            ConnectionEvent::RecoveryError { .. } => "recovery_error",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ConnectionEvent::StateTransition { timestamp, .. }
            | ConnectionEvent::RecoveryAttempt { timestamp, .. }
            | ConnectionEvent::Recovered { timestamp, .. }
            | ConnectionEvent::RecoveryError { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            ConnectionEvent::StateTransition { connection, .. }
            | ConnectionEvent::RecoveryAttempt { connection, .. }
            | ConnectionEvent::Recovered { connection, .. }
            | ConnectionEvent::RecoveryError { connection, .. } => connection,
        }
    }
}
