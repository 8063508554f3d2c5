use crate::error::WalletError;
use crate::models::{
    ClinicWalletSummary, PagedList, TransactionQuery, TransactionStatus, WalletTransaction,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable record of wallet transactions.
///
/// Rows are only ever changed through [`TransactionStore::compare_and_swap`],
/// which fails with [`WalletError::Conflict`] when the stored status no
/// longer matches the status the caller read.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<WalletTransaction>, WalletError>;

    /// Stores a new row. Fails with `InvalidInput` if the id is taken.
    async fn insert(&self, tx: WalletTransaction) -> Result<(), WalletError>;

    async fn compare_and_swap(
        &self,
        updated: WalletTransaction,
        expected: TransactionStatus,
    ) -> Result<(), WalletError>;

    async fn for_clinic(&self, clinic_id: Uuid) -> Result<Vec<WalletTransaction>, WalletError>;

    async fn with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<WalletTransaction>, WalletError>;

    async fn all(&self) -> Result<Vec<WalletTransaction>, WalletError>;

    async fn ping(&self) -> bool {
        true
    }

    async fn list(
        &self,
        query: &TransactionQuery,
    ) -> Result<PagedList<WalletTransaction>, WalletError> {
        let rows = match query.clinic_id {
            Some(clinic_id) => self.for_clinic(clinic_id).await?,
            None => self.all().await?,
        };
        query.apply(rows)
    }

    async fn wallet_summary(&self, clinic_id: Uuid) -> Result<ClinicWalletSummary, WalletError> {
        let rows = self.for_clinic(clinic_id).await?;
        Ok(ClinicWalletSummary::from_transactions(clinic_id, &rows))
    }
}

pub type TransactionStoreRef = Arc<dyn TransactionStore>;

/// Rejects rows that break the status/field coupling before they are written.
pub(crate) fn validate_row(tx: &WalletTransaction) -> Result<(), WalletError> {
    tx.check_invariants().map_err(|e| {
        WalletError::InvalidInput(format!("Transaction {} is inconsistent: {}", tx.id, e))
    })
}

#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<Uuid, WalletTransaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn get(&self, id: Uuid) -> Result<Option<WalletTransaction>, WalletError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn insert(&self, tx: WalletTransaction) -> Result<(), WalletError> {
        validate_row(&tx)?;
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.id) {
            return Err(WalletError::InvalidInput(format!(
                "Transaction {} already exists",
                tx.id
            )));
        }
        transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        updated: WalletTransaction,
        expected: TransactionStatus,
    ) -> Result<(), WalletError> {
        validate_row(&updated)?;
        let mut transactions = self.transactions.write().await;
        let current = transactions
            .get_mut(&updated.id)
            .ok_or(WalletError::NotFound(updated.id))?;

        if current.status != expected {
            tracing::debug!(
                transaction_id = %updated.id,
                expected = %expected,
                actual = %current.status,
                "Conditional write lost the race"
            );
            return Err(WalletError::Conflict(updated.id));
        }

        *current = updated;
        Ok(())
    }

    async fn for_clinic(&self, clinic_id: Uuid) -> Result<Vec<WalletTransaction>, WalletError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.clinic_id == clinic_id)
            .cloned()
            .collect())
    }

    async fn with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<WalletTransaction>, WalletError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.values().cloned().collect())
    }
}
