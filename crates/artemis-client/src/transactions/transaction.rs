use super::controller::TransactionController;
use crate::error::{CoordinatorError, Result};
use crate::outcome::{TransactionalState, TxnId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A local transaction, bound to a broker transaction on first use.
///
/// A new `Transaction` is unbound. The first transactional send through a
/// producer declares it with the connection's coordinator; later sends reuse
/// the same broker transaction. Clones share the same transaction.
///
/// ```rust,ignore
/// let transaction = Transaction::new();
/// producer.send_async(Message::new("foo1"), Some(&transaction), &token).await?;
/// producer.send_async(Message::new("foo2"), Some(&transaction), &token).await?;
/// transaction.commit_async(&token).await?;
/// ```
#[derive(Clone, Default)]
pub struct Transaction {
    enlistment: Arc<Mutex<Enlistment>>,
}

#[derive(Clone, Default)]
enum Enlistment {
    #[default]
    Unbound,
    Enlisting,
    Bound(Binding),
    Discharged,
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) state: TransactionalState,
    pub(crate) controller: Arc<TransactionController>,
    pub(crate) owner: Arc<()>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// The broker transaction id, once declared.
    pub fn txn_id(&self) -> Option<TxnId> {
        match &*self.enlistment.lock() {
            Enlistment::Bound(binding) => Some(binding.state.txn_id().clone()),
            _ => None,
        }
    }

    /// Returns true once the transaction has been declared and not yet discharged.
    pub fn is_enlisted(&self) -> bool {
        matches!(*self.enlistment.lock(), Enlistment::Bound(_))
    }

    pub fn is_discharged(&self) -> bool {
        matches!(*self.enlistment.lock(), Enlistment::Discharged)
    }

    /// Commits the transaction. Committing a transaction nothing was sent
    /// under succeeds without contacting the broker.
    pub async fn commit_async(&self, cancellation: &CancellationToken) -> Result<()> {
        self.discharge(false, cancellation).await
    }

    /// Rolls the transaction back. Rolling back a transaction nothing was sent
    /// under succeeds without contacting the broker.
    pub async fn rollback_async(&self, cancellation: &CancellationToken) -> Result<()> {
        self.discharge(true, cancellation).await
    }

    /// Rolls back if still enlisted, then retires the transaction.
    ///
    /// Failures are logged, not returned: a transaction lost to recovery has
    /// already been rolled back by the broker.
    pub async fn dispose_async(&self) {
        if self.is_enlisted() {
            if let Err(_error) = self.rollback_async(&CancellationToken::new()).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_error, "rollback on dispose failed");
            }
        }
        *self.enlistment.lock() = Enlistment::Discharged;
    }

    async fn discharge(&self, fail: bool, cancellation: &CancellationToken) -> Result<()> {
        let binding = match &*self.enlistment.lock() {
            Enlistment::Unbound => return Ok(()),
            Enlistment::Enlisting => return Err(CoordinatorError::EnlistmentInProgress.into()),
            Enlistment::Bound(binding) => binding.clone(),
            Enlistment::Discharged => return Err(CoordinatorError::AlreadyDischarged.into()),
        };
        binding
            .controller
            .discharge(binding.state.txn_id(), fail, cancellation)
            .await?;
        *self.enlistment.lock() = Enlistment::Discharged;
        Ok(())
    }

    /// Delivery state for a send through the manager identified by `owner`,
    /// or `None` if the transaction is not bound yet.
    pub(crate) fn bound_state(&self, owner: &Arc<()>) -> Result<Option<TransactionalState>> {
        match &*self.enlistment.lock() {
            Enlistment::Unbound | Enlistment::Enlisting => Ok(None),
            Enlistment::Bound(binding) if !Arc::ptr_eq(&binding.owner, owner) => {
                Err(CoordinatorError::ForeignConnection.into())
            }
            Enlistment::Bound(binding) if binding.controller.is_invalidated() => {
                Err(CoordinatorError::StaleTransaction.into())
            }
            Enlistment::Bound(binding) => Ok(Some(binding.state.clone())),
            Enlistment::Discharged => Err(CoordinatorError::AlreadyDischarged.into()),
        }
    }

    /// Moves an unbound transaction to `Enlisting`.
    ///
    /// The returned guard puts the transaction back to `Unbound` unless
    /// [`EnlistGuard::complete`] is called, so a cancelled enlistment leaves
    /// the transaction reusable.
    pub(crate) fn begin_enlisting(&self) -> Result<EnlistGuard<'_>> {
        let mut enlistment = self.enlistment.lock();
        match &*enlistment {
            Enlistment::Unbound => {
                *enlistment = Enlistment::Enlisting;
                Ok(EnlistGuard {
                    transaction: self,
                    completed: false,
                })
            }
            Enlistment::Discharged => Err(CoordinatorError::AlreadyDischarged.into()),
            _ => Err(CoordinatorError::EnlistmentInProgress.into()),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.enlistment.lock() {
            Enlistment::Unbound => "unbound".to_string(),
            Enlistment::Enlisting => "enlisting".to_string(),
            Enlistment::Bound(binding) => format!("bound({})", binding.state.txn_id()),
            Enlistment::Discharged => "discharged".to_string(),
        };
        f.debug_struct("Transaction").field("state", &state).finish()
    }
}

pub(crate) struct EnlistGuard<'a> {
    transaction: &'a Transaction,
    completed: bool,
}

impl EnlistGuard<'_> {
    pub(crate) fn complete(mut self, binding: Binding) {
        *self.transaction.enlistment.lock() = Enlistment::Bound(binding);
        self.completed = true;
    }
}

impl Drop for EnlistGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut enlistment = self.transaction.enlistment.lock();
            if matches!(*enlistment, Enlistment::Enlisting) {
                *enlistment = Enlistment::Unbound;
            }
        }
    }
}
