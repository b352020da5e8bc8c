use crate::error::{ClientError, CoordinatorError, Result, TransportError};
use crate::outcome::{DeliveryOutcome, TxnId};
use crate::transport::{
    ControlRequest, CoordinatorAttach, CoordinatorLink, Session, TransportConnection,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Owns a coordinator link and turns declare and discharge requests into
/// transaction ids and completions.
///
/// A controller is bound to one transport. Once that transport is lost the
/// controller is invalidated, and every transaction it declared is stale.
pub(crate) struct TransactionController {
    connection_name: String,
    session: Arc<dyn Session>,
    link: Arc<dyn CoordinatorLink>,
    invalidated: AtomicBool,
}

impl TransactionController {
    /// Opens a session on `connection` and attaches a coordinator link to it.
    pub(crate) async fn attach(
        connection_name: &str,
        connection: &dyn TransportConnection,
    ) -> Result<Arc<Self>> {
        let link_failed = |source: TransportError| ClientError::CreateLinkFailed {
            address: "coordinator".to_string(),
            source,
        };
        let session = connection.open_session().await.map_err(link_failed)?;
        let attach = CoordinatorAttach::local_transactions(controller_link_name());
        let link = match session.attach_coordinator(attach).await {
            Ok(link) => link,
            Err(error) => {
                session.close().await;
                return Err(link_failed(error));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            connection = connection_name,
            link = link.name(),
            "transaction controller attached"
        );

        Ok(Arc::new(Self {
            connection_name: connection_name.to_string(),
            session,
            link,
            invalidated: AtomicBool::new(false),
        }))
    }

    /// Asks the coordinator for a new transaction.
    pub(crate) async fn declare(&self, cancellation: &CancellationToken) -> Result<TxnId> {
        match self.request(ControlRequest::Declare, cancellation).await? {
            DeliveryOutcome::Declared(txn_id) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    connection = %self.connection_name,
                    txn_id = %txn_id,
                    "transaction declared"
                );

                #[cfg(feature = "metrics")]
                counter!(
                    "artemis_transactions_declared_total",
                    "connection" => self.connection_name.clone()
                )
                .increment(1);

                Ok(txn_id)
            }
            DeliveryOutcome::Rejected(condition) => {
                Err(CoordinatorError::Rejected(condition).into())
            }
            DeliveryOutcome::TransportClosed => Err(CoordinatorError::LinkClosed.into()),
            other => Err(CoordinatorError::UnexpectedOutcome(other.to_string()).into()),
        }
    }

    /// Commits (`fail = false`) or rolls back (`fail = true`) a transaction.
    pub(crate) async fn discharge(
        &self,
        txn_id: &TxnId,
        fail: bool,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        if self.is_invalidated() {
            return Err(CoordinatorError::StaleTransaction.into());
        }
        let request = ControlRequest::Discharge {
            txn_id: txn_id.clone(),
            fail,
        };
        match self.request(request, cancellation).await? {
            DeliveryOutcome::Accepted => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    connection = %self.connection_name,
                    txn_id = %txn_id,
                    committed = !fail,
                    "transaction discharged"
                );
                Ok(())
            }
            DeliveryOutcome::Rejected(condition) => {
                Err(CoordinatorError::Rejected(condition).into())
            }
            DeliveryOutcome::TransportClosed if self.is_invalidated() => {
                Err(CoordinatorError::StaleTransaction.into())
            }
            DeliveryOutcome::TransportClosed => Err(CoordinatorError::LinkClosed.into()),
            other => Err(CoordinatorError::UnexpectedOutcome(other.to_string()).into()),
        }
    }

    async fn request(
        &self,
        request: ControlRequest,
        cancellation: &CancellationToken,
    ) -> Result<DeliveryOutcome> {
        if cancellation.is_cancelled() {
            return Err(ClientError::OperationCancelled);
        }
        let (tx, rx) = oneshot::channel();
        self.link
            .control(
                request,
                Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                }),
            )
            .map_err(|_| CoordinatorError::LinkClosed)?;

        tokio::select! {
            biased;
            // A callback dropped without being invoked means the link is gone.
            outcome = rx => Ok(outcome.unwrap_or(DeliveryOutcome::TransportClosed)),
            _ = cancellation.cancelled() => Err(ClientError::OperationCancelled),
        }
    }

    /// Marks every transaction declared here as stale.
    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Valid and backed by a live link.
    pub(crate) fn is_usable(&self) -> bool {
        !self.is_invalidated() && self.link.is_usable()
    }

    pub(crate) async fn close(&self) {
        self.invalidate();
        self.link.close().await;
        self.session.close().await;
    }
}

impl std::fmt::Debug for TransactionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionController")
            .field("connection", &self.connection_name)
            .field("link", &self.link.name())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

fn controller_link_name() -> String {
    format!("controller-link-{:05x}", rand::random::<u32>() & 0xf_ffff)
}
