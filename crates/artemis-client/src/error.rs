//! Error types for the client.

use crate::outcome::ErrorCondition;
use artemis_client_recovery::ConnectionState;
use std::fmt;

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Nothing is listening at the endpoint, or the broker refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The connection was lost after it had been established.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The connection has already been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The link was detached, optionally with an error from the peer.
    #[error("link detached{}", fmt_reason(.0))]
    LinkDetached(Option<ErrorCondition>),

    /// The peer refused to attach the link.
    #[error("attach refused: {0}")]
    AttachRefused(ErrorCondition),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The peer's error condition, if it sent one.
    pub fn condition(&self) -> Option<&ErrorCondition> {
        match self {
            TransportError::LinkDetached(condition) => condition.as_ref(),
            TransportError::AttachRefused(condition) => Some(condition),
            _ => None,
        }
    }
}

/// Failure category of [`ClientError::MessageSendFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendErrorCode {
    /// The broker rejected the message.
    Rejected,
    /// The broker released the message without processing it.
    Released,
    /// The transport failed or the broker answered with an unexpected outcome.
    InternalError,
}

impl fmt::Display for SendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendErrorCode::Rejected => "rejected",
            SendErrorCode::Released => "released",
            SendErrorCode::InternalError => "internal error",
        };
        f.write_str(name)
    }
}

/// Errors raised by the transaction coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The coordinator rejected a declare or discharge.
    #[error("transaction coordinator rejected the request{}", fmt_reason(.0))]
    Rejected(Option<ErrorCondition>),

    /// The transaction was declared on a coordinator lost to connection recovery.
    #[error("transaction was declared on a connection that has since been recovered")]
    StaleTransaction,

    /// The coordinator link went away before the broker answered.
    #[error("transaction coordinator link closed")]
    LinkClosed,

    /// The coordinator answered with an outcome that does not fit the request.
    #[error("unexpected coordinator outcome: {0}")]
    UnexpectedOutcome(String),

    /// Commit or rollback has already completed for this transaction.
    #[error("transaction already discharged")]
    AlreadyDischarged,

    /// The transaction is enlisted with a different connection.
    #[error("transaction is enlisted on a different connection")]
    ForeignConnection,

    /// Another connection is enlisting the transaction right now.
    #[error("transaction enlistment already in progress")]
    EnlistmentInProgress,
}

/// Errors surfaced to users of the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The producer is disposed, or its link is detaching or closed.
    #[error("producer is closed{}", fmt_reason(.reason))]
    ProducerClosed { reason: Option<ErrorCondition> },

    /// The consumer is disposed, or its link is detaching or closed.
    #[error("consumer is closed{}", fmt_reason(.reason))]
    ConsumerClosed { reason: Option<ErrorCondition> },

    /// The broker did not accept the message.
    #[error("message send failed ({code}): {description}")]
    MessageSendFailed {
        code: SendErrorCode,
        description: String,
        condition: Option<ErrorCondition>,
    },

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// The recovery policy gave up.
    #[error("connection recovery gave up after {attempts} failed attempts")]
    ConnectionRecoveryExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The initial connection could not be established.
    #[error("failed to connect to {endpoint}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The connection has been disposed or recovery gave up.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The connection exists but is not currently usable.
    #[error("connection is not open (state: {state})")]
    ConnectionNotOpen { state: ConnectionState },

    /// A producer, consumer or coordinator link could not be attached.
    #[error("failed to attach link to '{address}'")]
    CreateLinkFailed {
        address: String,
        #[source]
        source: TransportError,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    OperationCancelled,

    /// Settlement was requested for a message that did not come from a consumer.
    #[error("message was not received through a consumer")]
    NotADelivery,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns true if the error means the entity or connection is unusable.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ClientError::ProducerClosed { .. }
                | ClientError::ConsumerClosed { .. }
                | ClientError::ConnectionClosed
                | ClientError::ConnectionNotOpen { .. }
        )
    }

    /// Returns true if the error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::OperationCancelled)
    }

    /// Returns true if the error came from the transaction coordinator.
    pub fn is_coordinator(&self) -> bool {
        matches!(self, ClientError::Coordinator(_))
    }

    /// Returns true if the broker refused a message.
    pub fn is_send_failed(&self) -> bool {
        matches!(self, ClientError::MessageSendFailed { .. })
    }

    /// The send failure code, if this is a send failure.
    pub fn send_error_code(&self) -> Option<SendErrorCode> {
        match self {
            ClientError::MessageSendFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The coordinator error, if this is one.
    pub fn coordinator_error(&self) -> Option<&CoordinatorError> {
        match self {
            ClientError::Coordinator(error) => Some(error),
            _ => None,
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one endpoint must be configured")]
    NoEndpoints,

    #[error("address must not be empty")]
    EmptyAddress,
}

fn fmt_reason(condition: &Option<ErrorCondition>) -> String {
    match condition {
        Some(condition) => format!(": {}", condition),
        None => String::new(),
    }
}
