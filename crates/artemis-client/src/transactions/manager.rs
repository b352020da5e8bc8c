use super::controller::TransactionController;
use super::transaction::{Binding, Transaction};
use crate::error::{ClientError, CoordinatorError, Result};
use crate::outcome::TransactionalState;
use crate::transport::TransportSlot;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Binds transactions to broker transactions on the connection's coordinator.
///
/// One controller is created lazily per transport and shared by every
/// transaction of the connection. Enlistment is serialized by an async lock,
/// so concurrent first sends under one transaction produce a single declare.
/// Already bound transactions bypass the lock entirely.
pub(crate) struct TransactionsManager {
    connection_name: String,
    identity: Arc<()>,
    transport: Arc<TransportSlot>,
    controller: Mutex<Option<Arc<TransactionController>>>,
    enlistment: tokio::sync::Mutex<()>,
}

impl TransactionsManager {
    pub(crate) fn new(connection_name: impl Into<String>, transport: Arc<TransportSlot>) -> Self {
        Self {
            connection_name: connection_name.into(),
            identity: Arc::new(()),
            transport,
            controller: Mutex::new(None),
            enlistment: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the delivery state to send under, declaring the transaction
    /// first if it is not bound yet. `None` for non-transactional sends.
    pub(crate) async fn transactional_state(
        &self,
        transaction: Option<&Transaction>,
        cancellation: &CancellationToken,
    ) -> Result<Option<TransactionalState>> {
        let Some(transaction) = transaction else {
            return Ok(None);
        };
        if let Some(state) = transaction.bound_state(&self.identity)? {
            return Ok(Some(state));
        }

        let _enlistment = tokio::select! {
            guard = self.enlistment.lock() => guard,
            _ = cancellation.cancelled() => return Err(ClientError::OperationCancelled),
        };
        // Another caller may have bound it while we waited.
        if let Some(state) = transaction.bound_state(&self.identity)? {
            return Ok(Some(state));
        }

        let guard = transaction.begin_enlisting()?;
        let controller = self.controller().await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %self.connection_name, "enlisting transaction");

        let txn_id = controller.declare(cancellation).await?;
        if controller.is_invalidated() {
            return Err(CoordinatorError::StaleTransaction.into());
        }

        let state = TransactionalState::new(txn_id);
        guard.complete(Binding {
            state: state.clone(),
            controller,
            owner: Arc::clone(&self.identity),
        });
        Ok(Some(state))
    }

    async fn controller(&self) -> Result<Arc<TransactionController>> {
        let existing = self.controller.lock().clone();
        if let Some(controller) = existing.filter(|controller| controller.is_usable()) {
            return Ok(controller);
        }

        let connection = self
            .transport
            .get()
            .ok_or(ClientError::Coordinator(CoordinatorError::LinkClosed))?;
        let controller =
            TransactionController::attach(&self.connection_name, connection.as_ref()).await?;
        *self.controller.lock() = Some(Arc::clone(&controller));
        Ok(controller)
    }

    /// Drops the current controller. Transactions it declared become stale.
    pub(crate) fn invalidate(&self) {
        let controller = self.controller.lock().take();
        if let Some(controller) = controller {
            controller.invalidate();

            #[cfg(feature = "tracing")]
            tracing::debug!(
                connection = %self.connection_name,
                "transaction controller invalidated"
            );
        }
    }

    /// Detaches the current controller, if any.
    pub(crate) async fn close(&self) {
        let controller = self.controller.lock().take();
        if let Some(controller) = controller {
            controller.close().await;
        }
    }
}

impl std::fmt::Debug for TransactionsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionsManager")
            .field("connection", &self.connection_name)
            .field("controller", &*self.controller.lock())
            .finish()
    }
}
