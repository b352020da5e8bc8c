//! Tests for the auto-recovering connection.
//!
//! Test organization:
//! - lifecycle.rs: Connecting, disposing and dropping
//! - failover.rs: Endpoint failover and recovery policies
//! - recovery.rs: Reattaching producers and consumers after recovery

mod recovery;
