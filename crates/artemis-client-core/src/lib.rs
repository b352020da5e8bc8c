//! Core infrastructure for the artemis AMQP 1.0 client.
//!
//! This crate provides the event system shared by the recovery and client
//! crates: callback listeners collected at configuration time, and a runtime
//! [`EventBus`] supporting both callback listeners and channel subscriptions.

pub mod events;

pub use events::{
    ClientEvent, EventBus, EventListener, EventListeners, FnListener, ListenerId,
};
