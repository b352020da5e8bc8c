//! Recovery building blocks for the artemis AMQP 1.0 client.
//!
//! This crate holds the pieces of connection recovery that know nothing about
//! AMQP itself:
//!
//! - **Backoff**: pluggable [`IntervalFunction`]s (fixed, linear, exponential,
//!   exponential with jitter, function-based)
//! - **Policy**: [`RecoveryPolicy`] turns a consecutive-failure count into
//!   "retry after this delay" or "give up"
//! - **Failover**: [`EndpointSelector`] walks an ordered endpoint list
//! - **State**: [`ConnectionStateTracker`] enforces the
//!   `Connecting → Open ⇄ Recovering → Closed` state machine
//!
//! # Examples
//!
//! ```rust
//! use artemis_client_recovery::{Endpoint, EndpointSelector, RecoveryPolicy};
//! use std::time::Duration;
//!
//! let selector = EndpointSelector::new(vec![
//!     Endpoint::new("broker-a", 5672),
//!     Endpoint::new("broker-b", 5672),
//! ])
//! .unwrap();
//! let policy = RecoveryPolicy::exponential_backoff(
//!     Duration::from_millis(100),
//!     Duration::from_secs(5),
//!     10,
//! );
//!
//! let mut attempt = 0;
//! let endpoint = selector.next();
//! // ... connecting to `endpoint` failed ...
//! attempt += 1;
//! if let Some(delay) = policy.next_delay(attempt) {
//!     assert_eq!(delay, Duration::from_millis(100));
//!     assert_eq!(selector.next().host(), "broker-b");
//! }
//! # let _ = endpoint;
//! ```

mod backoff;
mod endpoint;
mod policy;
mod state;

pub use backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, FnInterval, IntervalFunction,
    LinearBackoff,
};
pub use endpoint::{
    CustomSelectorFn, EmptyEndpointList, Endpoint, EndpointParseError, EndpointSelector, Scheme,
    SelectionStrategy,
};
pub use policy::RecoveryPolicy;
pub use state::{ConnectionState, ConnectionStateTracker, InvalidTransition};
