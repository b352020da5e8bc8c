//! Tests for transactions shared across producers.
//!
//! Test organization:
//! - commit.rs: Commit, rollback and visibility
//! - enlistment.rs: Lazy declaration and concurrent enlistment
//! - recovery.rs: Transactions that span a lost connection

mod commit;
mod enlistment;
