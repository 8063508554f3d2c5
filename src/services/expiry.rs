use crate::error::WalletError;
use crate::services::approval::ApprovalService;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const EXPIRED_REASON: &str = "Payment window expired";

/// Discards QR payments that were never completed within the payment window.
pub struct ExpiryMonitor {
    approvals: Arc<ApprovalService>,
    window: chrono::Duration,
    sweep_every: Duration,
}

impl ExpiryMonitor {
    pub fn new(approvals: Arc<ApprovalService>, window: Duration, sweep_every: Duration) -> Self {
        Self {
            approvals,
            window: chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            sweep_every,
        }
    }

    /// Discards every `WaitingForPayment` transaction whose QR was issued
    /// more than one window before `now`. Returns how many were discarded.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, WalletError> {
        let waiting = self.approvals.waiting_for_payment().await?;
        let mut discarded = 0;

        for tx in waiting {
            let Some(requested_at) = tx.payment_requested_at else {
                continue;
            };
            if now.signed_duration_since(requested_at) < self.window {
                continue;
            }

            match self.approvals.discard(tx.id, "system", EXPIRED_REASON).await {
                Ok(_) => discarded += 1,
                // Settled or discarded by someone else since the listing.
                Err(WalletError::InvalidState { .. }) | Err(WalletError::Conflict(_)) => {}
                Err(e) => tracing::warn!(
                    transaction_id = %tx.id,
                    error = %e,
                    "Could not expire payment"
                ),
            }
        }

        if discarded > 0 {
            tracing::info!(discarded, "Expired unpaid QR payments");
        }
        Ok(discarded)
    }

    pub async fn run(self) {
        tracing::info!(
            window_secs = self.window.num_seconds(),
            sweep_secs = self.sweep_every.as_secs(),
            "Payment expiry monitor started"
        );

        let mut ticker = interval(self.sweep_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once(Utc::now()).await {
                tracing::error!(error = %e, "Payment expiry sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransactionStatus, TransactionType, WalletTransaction};
    use crate::services::gateway::PaymentGateway;
    use crate::services::hub::NotificationHub;
    use crate::services::state_machine::QrIssue;
    use crate::services::store::InMemoryTransactionStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct QrGateway;

    #[async_trait]
    impl PaymentGateway for QrGateway {
        async fn request_qr(&self, _id: Uuid, _amount: u64) -> Result<Option<QrIssue>, WalletError> {
            Ok(Some(QrIssue {
                qr_url: "https://pay/x".to_string(),
                session_id: None,
            }))
        }
    }

    fn service() -> Arc<ApprovalService> {
        Arc::new(ApprovalService::new(
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(QrGateway),
            Arc::new(NotificationHub::new(Duration::from_secs(60))),
        ))
    }

    #[tokio::test]
    async fn discards_only_payments_past_the_window() {
        let approvals = service();
        let clinic = Uuid::new_v4();

        let tx = WalletTransaction::new(clinic, TransactionType::Withdrawal, 10, "payout");
        approvals.ingest(tx.clone()).await.unwrap();
        approvals.approve(tx.id, "admin").await.unwrap();

        let untouched = WalletTransaction::new(clinic, TransactionType::Withdrawal, 20, "payout");
        approvals.ingest(untouched.clone()).await.unwrap();

        let monitor = ExpiryMonitor::new(
            approvals.clone(),
            Duration::from_secs(900),
            Duration::from_secs(30),
        );

        assert_eq!(monitor.sweep_once(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(901);
        assert_eq!(monitor.sweep_once(later).await.unwrap(), 1);

        let expired = approvals.get(tx.id).await.unwrap();
        assert_eq!(expired.status, TransactionStatus::Failed);
        assert_eq!(expired.failure_message.as_deref(), Some(EXPIRED_REASON));
        assert_eq!(
            approvals.get(untouched.id).await.unwrap().status,
            TransactionStatus::WaitingApproval
        );

        assert_eq!(monitor.sweep_once(later).await.unwrap(), 0);
    }
}
