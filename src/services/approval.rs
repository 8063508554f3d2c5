use crate::error::WalletError;
use crate::models::{
    ClinicWalletSummary, GatewayOutcome, MAX_AMOUNT, PagedList, PaymentStatusEvent, TransactionQuery,
    TransactionStatus, WalletEffect, WalletTransaction,
};
use crate::services::gateway::PaymentGateway;
use crate::services::hub::NotificationHub;
use crate::services::state_machine::{self, TransactionEvent};
use crate::services::store::TransactionStore;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub transaction: WalletTransaction,
    pub qr_url: Option<String>,
    pub effect: WalletEffect,
}

/// Admin decisions and gateway outcomes for wallet transactions. Every
/// change goes through the state machine and a conditional store write.
pub struct ApprovalService {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    hub: Arc<NotificationHub>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            store,
            gateway,
            hub,
        }
    }

    /// Runs `op`, and once more on `Conflict`. `op` re-reads the row each
    /// time, so the retry sees whatever won the race.
    async fn retry_on_conflict<T, F, Fut>(&self, id: Uuid, op: F) -> Result<T, WalletError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, WalletError>>,
    {
        match op().await {
            Err(WalletError::Conflict(_)) => {
                tracing::info!(transaction_id = %id, "Write conflict, retrying once");
                op().await
            }
            other => other,
        }
    }

    async fn load(&self, id: Uuid) -> Result<WalletTransaction, WalletError> {
        self.store.get(id).await?.ok_or(WalletError::NotFound(id))
    }

    fn expect_status(
        tx: &WalletTransaction,
        expected: TransactionStatus,
    ) -> Result<(), WalletError> {
        if tx.status != expected {
            return Err(WalletError::InvalidState {
                id: tx.id,
                status: tx.status,
                expected,
            });
        }
        Ok(())
    }

    /// Writes the transition of `current` under `event`, expecting the row
    /// to still be in `current.status`.
    async fn commit(
        &self,
        current: &WalletTransaction,
        event: TransactionEvent,
        actor: Option<&str>,
    ) -> Result<(WalletTransaction, WalletEffect), WalletError> {
        let (next, transition) = state_machine::apply(current, event, actor, Utc::now())?;
        self.store
            .compare_and_swap(next.clone(), transition.from)
            .await?;

        tracing::info!(
            transaction_id = %next.id,
            clinic_id = %next.clinic_id,
            from = %transition.from,
            to = %transition.to,
            balance_delta = transition.effect.balance_delta,
            pending_withdrawals_delta = transition.effect.pending_withdrawals_delta,
            "Transaction status changed"
        );
        Ok((next, transition.effect))
    }

    pub async fn approve(&self, id: Uuid, actor: &str) -> Result<ApprovalOutcome, WalletError> {
        self.retry_on_conflict(id, || self.try_approve(id, actor)).await
    }

    async fn try_approve(&self, id: Uuid, actor: &str) -> Result<ApprovalOutcome, WalletError> {
        let current = self.load(id).await?;
        Self::expect_status(&current, TransactionStatus::WaitingApproval)?;

        let qr = if current.is_withdrawal() {
            self.gateway.request_qr(current.id, current.amount).await?
        } else {
            None
        };

        let (transaction, effect) = self
            .commit(&current, TransactionEvent::Approve { qr }, Some(actor))
            .await?;

        if transaction.status == TransactionStatus::Completed {
            self.hub
                .publish(
                    transaction.id,
                    PaymentStatusEvent::completed(transaction.amount, transaction.updated_at),
                )
                .await;
        }

        Ok(ApprovalOutcome {
            qr_url: transaction.latest_qr_url.clone(),
            transaction,
            effect,
        })
    }

    pub async fn reject(
        &self,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<ApprovalOutcome, WalletError> {
        if reason.trim().is_empty() {
            return Err(WalletError::MissingReason);
        }
        self.retry_on_conflict(id, || self.try_reject(id, actor, reason)).await
    }

    async fn try_reject(
        &self,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<ApprovalOutcome, WalletError> {
        let current = self.load(id).await?;
        Self::expect_status(&current, TransactionStatus::WaitingApproval)?;

        let (transaction, effect) = self
            .commit(
                &current,
                TransactionEvent::Reject {
                    reason: reason.to_string(),
                },
                Some(actor),
            )
            .await?;

        Ok(ApprovalOutcome {
            transaction,
            qr_url: None,
            effect,
        })
    }

    /// Applies a gateway outcome and tells everyone watching the transaction.
    pub async fn handle_gateway_callback(
        &self,
        id: Uuid,
        outcome: GatewayOutcome,
    ) -> Result<WalletTransaction, WalletError> {
        let (transaction, _) = self
            .retry_on_conflict(id, || self.try_gateway_callback(id, outcome.clone()))
            .await?;

        self.hub
            .publish(id, PaymentStatusEvent::from(&outcome))
            .await;
        Ok(transaction)
    }

    async fn try_gateway_callback(
        &self,
        id: Uuid,
        outcome: GatewayOutcome,
    ) -> Result<(WalletTransaction, WalletEffect), WalletError> {
        let current = self.load(id).await?;

        if let GatewayOutcome::Success { amount, .. } = &outcome {
            if *amount != current.amount {
                tracing::warn!(
                    transaction_id = %id,
                    expected = current.amount,
                    reported = *amount,
                    "Gateway reported a different amount"
                );
            }
        }

        self.commit(&current, outcome.into(), None).await
    }

    /// Gives up on a QR payment nobody completed. Moves the transaction to
    /// `Failed`, releasing its pending withdrawal.
    pub async fn discard(
        &self,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<ApprovalOutcome, WalletError> {
        let reason = if reason.trim().is_empty() {
            "Payment discarded"
        } else {
            reason.trim()
        };

        let (transaction, effect) = self
            .retry_on_conflict(id, || self.try_discard(id, actor, reason))
            .await?;

        self.hub
            .publish(id, PaymentStatusEvent::failed(reason))
            .await;

        Ok(ApprovalOutcome {
            transaction,
            qr_url: None,
            effect,
        })
    }

    async fn try_discard(
        &self,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<(WalletTransaction, WalletEffect), WalletError> {
        let current = self.load(id).await?;
        Self::expect_status(&current, TransactionStatus::WaitingForPayment)?;
        self.commit(
            &current,
            TransactionEvent::Discard {
                reason: reason.to_string(),
            },
            Some(actor),
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<WalletTransaction, WalletError> {
        self.load(id).await
    }

    /// Stores a transaction created by the upstream request flow.
    pub async fn ingest(&self, tx: WalletTransaction) -> Result<WalletTransaction, WalletError> {
        if tx.amount == 0 {
            return Err(WalletError::InvalidInput("amount must be positive".to_string()));
        }
        if tx.amount > MAX_AMOUNT {
            return Err(WalletError::InvalidInput(format!(
                "amount must not exceed {}",
                MAX_AMOUNT
            )));
        }
        if !matches!(
            tx.status,
            TransactionStatus::WaitingApproval | TransactionStatus::Completed
        ) {
            return Err(WalletError::InvalidInput(format!(
                "new transactions start in WaitingApproval or Completed, not {}",
                tx.status
            )));
        }

        self.store.insert(tx.clone()).await?;
        tracing::info!(
            transaction_id = %tx.id,
            clinic_id = %tx.clinic_id,
            type_ = ?tx.type_,
            amount = tx.amount,
            status = %tx.status,
            "Transaction recorded"
        );
        Ok(tx)
    }

    pub async fn list(
        &self,
        query: &TransactionQuery,
    ) -> Result<PagedList<WalletTransaction>, WalletError> {
        self.store.list(query).await
    }

    pub async fn wallet_summary(&self, clinic_id: Uuid) -> Result<ClinicWalletSummary, WalletError> {
        self.store.wallet_summary(clinic_id).await
    }

    pub async fn waiting_for_payment(&self) -> Result<Vec<WalletTransaction>, WalletError> {
        self.store
            .with_status(TransactionStatus::WaitingForPayment)
            .await
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;
    use crate::services::hub::ClientHandle;
    use crate::services::state_machine::QrIssue;
    use crate::services::store::InMemoryTransactionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Gateway double: fixed answer, counts calls, can be held mid-call.
    #[derive(Default)]
    struct FakeGateway {
        qr_url: Option<String>,
        fail: bool,
        calls: AtomicUsize,
        hold: Option<Arc<Notify>>,
    }

    impl FakeGateway {
        fn with_qr(url: &str) -> Self {
            Self {
                qr_url: Some(url.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn request_qr(&self, _id: Uuid, _amount: u64) -> Result<Option<QrIssue>, WalletError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if self.fail {
                return Err(WalletError::GatewayUnavailable("connection refused".to_string()));
            }
            Ok(self.qr_url.clone().map(|qr_url| QrIssue {
                qr_url,
                session_id: None,
            }))
        }
    }

    struct Fixture {
        service: Arc<ApprovalService>,
        store: Arc<InMemoryTransactionStore>,
        hub: Arc<NotificationHub>,
        gateway: Arc<FakeGateway>,
        clinic: Uuid,
    }

    async fn fixture(gateway: FakeGateway) -> Fixture {
        let store = Arc::new(InMemoryTransactionStore::new());
        let hub = Arc::new(NotificationHub::new(Duration::from_secs(60)));
        let gateway = Arc::new(gateway);
        let service = Arc::new(ApprovalService::new(store.clone(), gateway.clone(), hub.clone()));
        let clinic = Uuid::new_v4();

        let mut opening = WalletTransaction::new(clinic, TransactionType::Deposit, 2_000_000, "opening balance");
        opening.status = TransactionStatus::Completed;
        opening.is_system_generated = true;
        service.ingest(opening).await.unwrap();

        Fixture {
            service,
            store,
            hub,
            gateway,
            clinic,
        }
    }

    async fn request_withdrawal(f: &Fixture, amount: u64) -> WalletTransaction {
        let tx = WalletTransaction::new(f.clinic, TransactionType::Withdrawal, amount, "monthly payout");
        f.service.ingest(tx).await.unwrap()
    }

    async fn summary(f: &Fixture) -> ClinicWalletSummary {
        f.service.wallet_summary(f.clinic).await.unwrap()
    }

    #[tokio::test]
    async fn approve_without_qr_completes_withdrawal() {
        let f = fixture(FakeGateway::default()).await;
        let t1 = request_withdrawal(&f, 300_000).await;
        let before = summary(&f).await;

        let outcome = f.service.approve(t1.id, "admin-1").await.unwrap();

        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert!(outcome.qr_url.is_none());
        assert_eq!(outcome.transaction.reviewed_by.as_deref(), Some("admin-1"));

        let after = summary(&f).await;
        assert_eq!(after.pending_withdrawals, before.pending_withdrawals - 300_000);
        assert_eq!(after.balance, before.balance - 300_000);

        let mut expected = before.clone();
        expected += outcome.effect;
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn approve_with_qr_then_gateway_success() {
        let f = fixture(FakeGateway::with_qr("https://pay/x")).await;
        let t2 = request_withdrawal(&f, 500_000).await;
        let before = summary(&f).await;

        let outcome = f.service.approve(t2.id, "admin").await.unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::WaitingForPayment);
        assert_eq!(outcome.qr_url.as_deref(), Some("https://pay/x"));
        let stored = f.store.get(t2.id).await.unwrap().unwrap();
        assert_eq!(stored.latest_qr_url.as_deref(), Some("https://pay/x"));
        assert_eq!(summary(&f).await, before);

        let (client, mut rx) = ClientHandle::new(4);
        client.mark_connected();
        f.hub.join(t2.id, &client).await.unwrap();

        let paid_at = Utc::now();
        let done = f
            .service
            .handle_gateway_callback(
                t2.id,
                GatewayOutcome::Success {
                    amount: 500_000,
                    timestamp: paid_at,
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, TransactionStatus::Completed);
        assert!(done.latest_qr_url.is_none());
        assert_eq!(summary(&f).await.balance, before.balance - 500_000);

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.transaction_id, t2.id);
        assert_eq!(pushed.event, PaymentStatusEvent::completed(500_000, paid_at));
    }

    #[tokio::test]
    async fn reject_records_reason_and_releases_pending() {
        let f = fixture(FakeGateway::default()).await;
        let t3 = request_withdrawal(&f, 120_000).await;
        let before = summary(&f).await;

        let outcome = f
            .service
            .reject(t3.id, "admin", "insufficient documentation")
            .await
            .unwrap();

        assert_eq!(outcome.transaction.status, TransactionStatus::Rejected);
        assert_eq!(
            outcome.transaction.rejection_reason.as_deref(),
            Some("insufficient documentation")
        );
        let after = summary(&f).await;
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.pending_withdrawals, before.pending_withdrawals - 120_000);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reject_requires_reason() {
        let f = fixture(FakeGateway::default()).await;
        let tx = request_withdrawal(&f, 1).await;
        let result = f.service.reject(tx.id, "admin", "  ").await;
        assert!(matches!(result, Err(WalletError::MissingReason)));
        assert_eq!(f.service.get(tx.id).await.unwrap().status, TransactionStatus::WaitingApproval);
    }

    #[tokio::test]
    async fn missing_transaction_is_not_found() {
        let f = fixture(FakeGateway::default()).await;
        let result = f.service.approve(Uuid::new_v4(), "admin").await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn second_approve_is_invalid_state_and_issues_no_second_qr() {
        let f = fixture(FakeGateway::with_qr("https://pay/x")).await;
        let tx = request_withdrawal(&f, 10).await;

        f.service.approve(tx.id, "admin").await.unwrap();
        let again = f.service.approve(tx.id, "admin").await;

        assert!(matches!(
            again,
            Err(WalletError::InvalidState {
                status: TransactionStatus::WaitingForPayment,
                ..
            })
        ));
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gateway_outage_leaves_transaction_retryable() {
        let f = fixture(FakeGateway {
            fail: true,
            ..Default::default()
        })
        .await;
        let tx = request_withdrawal(&f, 10).await;

        let result = f.service.approve(tx.id, "admin").await;
        assert!(matches!(result, Err(WalletError::GatewayUnavailable(_))));
        let stored = f.service.get(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::WaitingApproval);
        assert!(stored.reviewed_by.is_none());
    }

    #[tokio::test]
    async fn deposits_complete_without_gateway() {
        let f = fixture(FakeGateway::with_qr("https://pay/never")).await;
        let tx = WalletTransaction::new(f.clinic, TransactionType::Payment, 75, "consultation");
        f.service.ingest(tx.clone()).await.unwrap();
        let before = summary(&f).await;

        let outcome = f.service.approve(tx.id, "admin").await.unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 0);
        let after = summary(&f).await;
        assert_eq!(after.total_earnings, before.total_earnings + 75);
    }

    #[tokio::test]
    async fn concurrent_approve_and_reject_have_one_winner() {
        let hold = Arc::new(Notify::new());
        let f = fixture(FakeGateway {
            qr_url: Some("https://pay/x".to_string()),
            hold: Some(hold.clone()),
            ..Default::default()
        })
        .await;
        let tx = request_withdrawal(&f, 10).await;

        let approving = {
            let service = f.service.clone();
            tokio::spawn(async move { service.approve(tx.id, "admin-a").await })
        };
        while f.gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let rejected = f.service.reject(tx.id, "admin-b", "duplicate request").await;
        hold.notify_one();
        let approved = approving.await.unwrap();

        assert!(rejected.is_ok());
        assert!(matches!(
            approved,
            Err(WalletError::InvalidState { .. }) | Err(WalletError::Conflict(_))
        ));
        let stored = f.service.get(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Rejected);
        assert!(stored.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn duplicate_gateway_callback_is_rejected() {
        let f = fixture(FakeGateway::with_qr("https://pay/x")).await;
        let tx = request_withdrawal(&f, 10).await;
        f.service.approve(tx.id, "admin").await.unwrap();

        f.service
            .handle_gateway_callback(tx.id, GatewayOutcome::PriceChanged)
            .await
            .unwrap();
        let again = f
            .service
            .handle_gateway_callback(
                tx.id,
                GatewayOutcome::Failure {
                    message: "late".to_string(),
                },
            )
            .await;

        assert!(matches!(
            again,
            Err(WalletError::InvalidTransition {
                from: TransactionStatus::PriceChanged,
                ..
            })
        ));
        assert!(f.hub.last_known(tx.id).await.unwrap().price_changed);
    }

    #[tokio::test]
    async fn price_change_releases_pending_withdrawal() {
        let f = fixture(FakeGateway::with_qr("https://pay/x")).await;
        let tx = request_withdrawal(&f, 40).await;
        let before = summary(&f).await;
        f.service.approve(tx.id, "admin").await.unwrap();

        let changed = f
            .service
            .handle_gateway_callback(tx.id, GatewayOutcome::PriceChanged)
            .await
            .unwrap();
        assert_eq!(changed.status, TransactionStatus::PriceChanged);

        let after = summary(&f).await;
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.pending_withdrawals, before.pending_withdrawals - 40);
    }

    #[tokio::test]
    async fn discard_fails_waiting_payment_and_notifies() {
        let f = fixture(FakeGateway::with_qr("https://pay/x")).await;
        let tx = request_withdrawal(&f, 40).await;
        let before = summary(&f).await;

        let early = f.service.discard(tx.id, "clinic-user", "closed dialog").await;
        assert!(matches!(early, Err(WalletError::InvalidState { .. })));

        f.service.approve(tx.id, "admin").await.unwrap();
        let outcome = f.service.discard(tx.id, "clinic-user", "").await.unwrap();

        assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
        assert_eq!(outcome.transaction.failure_message.as_deref(), Some("Payment discarded"));
        assert_eq!(summary(&f).await.pending_withdrawals, before.pending_withdrawals - 40);

        let last = f.hub.last_known(tx.id).await.unwrap();
        assert!(!last.success);
        assert_eq!(last.message.as_deref(), Some("Payment discarded"));
    }

    #[tokio::test]
    async fn ingest_validates_new_rows() {
        let f = fixture(FakeGateway::default()).await;
        let mut tx = WalletTransaction::new(f.clinic, TransactionType::Withdrawal, 0, "");
        assert!(matches!(f.service.ingest(tx.clone()).await, Err(WalletError::InvalidInput(_))));

        tx.amount = MAX_AMOUNT + 1;
        assert!(matches!(f.service.ingest(tx.clone()).await, Err(WalletError::InvalidInput(_))));
        assert!(f.service.get(tx.id).await.is_err());

        tx.amount = 5;
        tx.status = TransactionStatus::Failed;
        tx.failure_message = Some("x".to_string());
        assert!(matches!(f.service.ingest(tx).await, Err(WalletError::InvalidInput(_))));
    }
}
