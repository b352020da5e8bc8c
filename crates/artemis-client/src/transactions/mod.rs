//! Local transactions over an AMQP transaction coordinator.

mod controller;
mod manager;
mod transaction;

pub(crate) use manager::TransactionsManager;
pub use transaction::Transaction;
