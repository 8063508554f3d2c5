use crate::client::transport::RealtimeTransport;
use crate::error::WalletError;
use crate::models::{ApiResponse, PaymentStatusEvent, TransactionStatus, WalletTransaction};
use crate::services::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// Source of the authoritative transaction after an event arrives.
#[async_trait]
pub trait TransactionFetcher: Send + Sync {
    async fn fetch(&self, transaction_id: Uuid) -> Result<WalletTransaction, WalletError>;
}

/// Reads transactions from `GET /transactions/:id`.
pub struct HttpTransactionFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransactionFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TransactionFetcher for HttpTransactionFetcher {
    async fn fetch(&self, transaction_id: Uuid) -> Result<WalletTransaction, WalletError> {
        let response = self
            .client
            .get(format!("{}/transactions/{}", self.base_url, transaction_id))
            .send()
            .await
            .map_err(|e| WalletError::Internal(format!("fetch failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WalletError::NotFound(transaction_id));
        }
        if !status.is_success() {
            return Err(WalletError::Internal(format!("server returned {}", status)));
        }

        let body: ApiResponse<WalletTransaction> = response
            .json()
            .await
            .map_err(|e| WalletError::Internal(format!("unreadable transaction: {}", e)))?;
        Ok(body.value)
    }
}

/// What a waiting screen shows for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentUiState {
    Succeeded {
        amount: Option<u64>,
        timestamp: Option<DateTime<Utc>>,
    },
    Failed {
        message: String,
    },
    /// The gateway invalidated the QR; a fresh transaction is needed.
    PriceChanged,
    TimedOut,
}

impl PaymentUiState {
    pub fn from_event(event: &PaymentStatusEvent) -> Self {
        match event.implied_status() {
            TransactionStatus::Completed => PaymentUiState::Succeeded {
                amount: event.amount,
                timestamp: event.timestamp,
            },
            TransactionStatus::PriceChanged => PaymentUiState::PriceChanged,
            _ => PaymentUiState::Failed {
                message: event
                    .message
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string()),
            },
        }
    }

    /// The state for an already settled transaction, or `None` while it is
    /// still pending.
    pub fn from_transaction(tx: &WalletTransaction) -> Option<Self> {
        match tx.status {
            TransactionStatus::WaitingApproval | TransactionStatus::WaitingForPayment => None,
            TransactionStatus::Completed => Some(PaymentUiState::Succeeded {
                amount: Some(tx.amount),
                timestamp: Some(tx.updated_at),
            }),
            TransactionStatus::PriceChanged => Some(PaymentUiState::PriceChanged),
            TransactionStatus::Rejected => Some(PaymentUiState::Failed {
                message: tx
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "Rejected".to_string()),
            }),
            TransactionStatus::Failed => Some(PaymentUiState::Failed {
                message: tx
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentWatch {
    pub state: PaymentUiState,
    /// Re-fetched after the outcome; `None` if the fetch failed.
    pub transaction: Option<WalletTransaction>,
}

/// Drives one payment waiting screen: connects with bounded backoff, joins
/// the transaction's session only once connected, and leaves when done.
pub struct PaymentSessionController<T, F> {
    transport: T,
    fetcher: F,
    connect_policy: RetryPolicy,
    joined: HashSet<Uuid>,
}

impl<T, F> PaymentSessionController<T, F>
where
    T: RealtimeTransport,
    F: TransactionFetcher,
{
    pub fn new(transport: T, fetcher: F, connect_policy: RetryPolicy) -> Self {
        Self {
            transport,
            fetcher,
            connect_policy,
            joined: HashSet::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_joined(&self, transaction_id: Uuid) -> bool {
        self.joined.contains(&transaction_id)
    }

    /// Connects unless already connected, backing off between attempts.
    pub async fn ensure_connected(&mut self) -> Result<(), WalletError> {
        let mut attempt = 0;
        loop {
            if self.transport.is_connected() {
                return Ok(());
            }
            attempt += 1;
            match self.transport.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.connect_policy.max_attempts => {
                    let delay = self.connect_policy.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Payment channel connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Joins after the connection is confirmed. A `SessionNotReady` from the
    /// join itself means the connection dropped; reconnect and try again.
    pub async fn join(&mut self, transaction_id: Uuid) -> Result<(), WalletError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ensure_connected().await?;
            match self.transport.join(transaction_id).await {
                Ok(()) => {
                    self.joined.insert(transaction_id);
                    tracing::debug!(transaction_id = %transaction_id, "Joined payment session");
                    return Ok(());
                }
                Err(WalletError::SessionNotReady(reason))
                    if attempt < self.connect_policy.max_attempts =>
                {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        reason = %reason,
                        "Join refused, reconnecting"
                    );
                    self.transport.disconnect().await;
                    tokio::time::sleep(self.connect_policy.delay_for(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Leaves the session. Not being joined is fine.
    pub async fn leave(&mut self, transaction_id: Uuid) {
        if !self.joined.remove(&transaction_id) {
            return;
        }
        if self.transport.is_connected() {
            if let Err(e) = self.transport.leave(transaction_id).await {
                tracing::debug!(transaction_id = %transaction_id, error = %e, "Leave not delivered");
            }
        }
    }

    async fn refetch(&self, transaction_id: Uuid) -> Option<WalletTransaction> {
        match self.fetcher.fetch(transaction_id).await {
            Ok(tx) => Some(tx),
            Err(e) => {
                tracing::warn!(transaction_id = %transaction_id, error = %e, "Re-fetch failed");
                None
            }
        }
    }

    /// Waits up to `wait` for the outcome of a QR payment. Leaves the
    /// session before returning, whatever the outcome.
    pub async fn watch(
        &mut self,
        transaction_id: Uuid,
        wait: Duration,
    ) -> Result<PaymentWatch, WalletError> {
        let deadline = Instant::now() + wait;
        self.join(transaction_id).await?;

        // The session may have been evicted already; the row is the truth.
        let current = self.refetch(transaction_id).await;
        if let Some(state) = current.as_ref().and_then(PaymentUiState::from_transaction) {
            self.leave(transaction_id).await;
            return Ok(PaymentWatch {
                state,
                transaction: current,
            });
        }

        let state = loop {
            match timeout_at(deadline, self.transport.next_event()).await {
                Err(_) => break PaymentUiState::TimedOut,
                Ok(Some(event)) if event.transaction_id == transaction_id => {
                    break PaymentUiState::from_event(&event.event)
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!(transaction_id = %transaction_id, "Connection lost, rejoining");
                    self.joined.remove(&transaction_id);
                    if let Err(e) = self.join(transaction_id).await {
                        self.leave(transaction_id).await;
                        return Err(e);
                    }
                }
            }
        };

        self.leave(transaction_id).await;
        let transaction = self.refetch(transaction_id).await;
        Ok(PaymentWatch { state, transaction })
    }

    /// Dialog closed: leave every session and drop the connection.
    pub async fn close(&mut self) {
        let joined: Vec<Uuid> = self.joined.iter().copied().collect();
        for transaction_id in joined {
            self.leave(transaction_id).await;
        }
        self.transport.disconnect().await;
    }
}
