//! Tests for the send pipeline.
//!
//! Test organization:
//! - outcomes.rs: Broker outcomes, cancellation and closed links
//! - messages.rs: Message defaults and properties as seen by consumers
//! - service.rs: The producer as a tower service

mod messages;
