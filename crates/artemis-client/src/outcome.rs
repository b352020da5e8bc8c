//! Broker verdicts on sent messages and coordinator requests.

use std::fmt;

/// An AMQP error condition as reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    /// Symbolic condition, e.g. `amqp:not-allowed`.
    pub condition: String,
    pub description: Option<String>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<String>, description: Option<String>) -> Self {
        Self {
            condition: condition.into(),
            description,
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.condition, description),
            None => f.write_str(&self.condition),
        }
    }
}

/// Broker-assigned transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxnId(Vec<u8>);

impl TxnId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Delivery state attached to a transactional send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionalState {
    txn_id: TxnId,
}

impl TransactionalState {
    pub fn new(txn_id: TxnId) -> Self {
        Self { txn_id }
    }

    pub fn txn_id(&self) -> &TxnId {
        &self.txn_id
    }
}

/// Terminal verdict delivered once per submitted message or coordinator request.
///
/// The set of outcomes is closed: transports map anything they do not
/// recognise onto [`DeliveryOutcome::Unknown`], keeping matches exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    Rejected(Option<ErrorCondition>),
    Released,
    /// Coordinator response to a declare request.
    Declared(TxnId),
    /// The link or connection went away before the peer answered.
    TransportClosed,
    /// An outcome the client does not model; carries its raw description.
    Unknown(String),
}

impl DeliveryOutcome {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Accepted => "accepted",
            DeliveryOutcome::Rejected(_) => "rejected",
            DeliveryOutcome::Released => "released",
            DeliveryOutcome::Declared(_) => "declared",
            DeliveryOutcome::TransportClosed => "transport_closed",
            DeliveryOutcome::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Rejected(Some(condition)) => write!(f, "rejected ({})", condition),
            DeliveryOutcome::Declared(txn_id) => write!(f, "declared ({})", txn_id),
            DeliveryOutcome::Unknown(raw) => write!(f, "unknown ({})", raw),
            other => f.write_str(other.label()),
        }
    }
}

/// Callback through which a transport reports the outcome of one submission.
///
/// Invoked at most once, typically from the transport's I/O context.
pub type OutcomeCallback = Box<dyn FnOnce(DeliveryOutcome) + Send + 'static>;
