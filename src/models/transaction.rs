use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Withdrawal,
    Deposit,
    Payment,
}

/// Largest amount a transaction may carry; wallet aggregates are `i64`.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    WaitingApproval,
    WaitingForPayment,
    Completed,
    Rejected,
    Failed,
    PriceChanged,
}

impl TransactionStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Rejected
                | TransactionStatus::Failed
                | TransactionStatus::PriceChanged
        )
    }

    /// Withdrawals in these states still count towards `pendingWithdrawals`.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            TransactionStatus::WaitingApproval | TransactionStatus::WaitingForPayment
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::WaitingApproval => "WaitingApproval",
            TransactionStatus::WaitingForPayment => "WaitingForPayment",
            TransactionStatus::Completed => "Completed",
            TransactionStatus::Rejected => "Rejected",
            TransactionStatus::Failed => "Failed",
            TransactionStatus::PriceChanged => "PriceChanged",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wallet movement for one clinic. Rows are never deleted; the status
/// history is the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: Uuid,
    pub clinic_id: Uuid,
    #[serde(rename = "type")]
    pub type_: TransactionType,
    pub amount: u64,
    pub status: TransactionStatus,
    pub transaction_date: DateTime<Utc>,
    pub description: String,
    pub is_system_generated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_qr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// A fresh transaction as the upstream request flow would create it.
    pub fn new(
        clinic_id: Uuid,
        type_: TransactionType,
        amount: u64,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            clinic_id,
            type_,
            amount,
            status: TransactionStatus::WaitingApproval,
            transaction_date: now,
            description: description.into(),
            is_system_generated: false,
            rejection_reason: None,
            latest_qr_url: None,
            payment_session_id: None,
            payment_requested_at: None,
            failure_message: None,
            reviewed_by: None,
            updated_at: now,
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        self.type_ == TransactionType::Withdrawal
    }

    /// The hub session key for this transaction.
    pub fn derived_session_id(&self) -> String {
        self.id.to_string()
    }

    /// Checks the field/status coupling every stored row must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.amount == 0 {
            return Err("amount must be positive".to_string());
        }
        if self.amount > MAX_AMOUNT {
            return Err(format!("amount must not exceed {}", MAX_AMOUNT));
        }

        let rejected = self.status == TransactionStatus::Rejected;
        let has_reason = self
            .rejection_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if rejected != has_reason {
            return Err(format!(
                "rejectionReason must be set iff status is Rejected (status {})",
                self.status
            ));
        }

        let waiting = self.status == TransactionStatus::WaitingForPayment;
        if waiting != self.latest_qr_url.is_some() {
            return Err(format!(
                "latestQrUrl must be set iff status is WaitingForPayment (status {})",
                self.status
            ));
        }
        if waiting != self.payment_requested_at.is_some() {
            return Err(format!(
                "paymentRequestedAt must be set iff status is WaitingForPayment (status {})",
                self.status
            ));
        }

        let failed = self.status == TransactionStatus::Failed;
        if failed != self.failure_message.is_some() {
            return Err(format!(
                "failureMessage must be set iff status is Failed (status {})",
                self.status
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_waits_for_approval_and_is_valid() {
        let tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Withdrawal, 100, "payout");
        assert_eq!(tx.status, TransactionStatus::WaitingApproval);
        assert!(tx.check_invariants().is_ok());
        assert_eq!(tx.derived_session_id(), tx.id.to_string());
    }

    #[test]
    fn amount_above_i64_range_violates_invariants() {
        let mut tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Deposit, MAX_AMOUNT, "");
        assert!(tx.check_invariants().is_ok());
        tx.amount = MAX_AMOUNT + 1;
        assert!(tx.check_invariants().is_err());
    }

    #[test]
    fn rejected_without_reason_violates_invariants() {
        let mut tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Withdrawal, 100, "");
        tx.status = TransactionStatus::Rejected;
        assert!(tx.check_invariants().is_err());
        tx.rejection_reason = Some("  ".to_string());
        assert!(tx.check_invariants().is_err());
        tx.rejection_reason = Some("no invoice".to_string());
        assert!(tx.check_invariants().is_ok());
    }

    #[test]
    fn qr_url_outside_waiting_for_payment_violates_invariants() {
        let mut tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Withdrawal, 100, "");
        tx.latest_qr_url = Some("https://pay/x".to_string());
        assert!(tx.check_invariants().is_err());
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Payment, 5, "visit");
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "Payment");
        assert_eq!(json["status"], "WaitingApproval");
        assert_eq!(json["isSystemGenerated"], false);
        assert!(json.get("rejectionReason").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TransactionStatus::WaitingApproval.is_terminal());
        assert!(!TransactionStatus::WaitingForPayment.is_terminal());
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Rejected,
            TransactionStatus::Failed,
            TransactionStatus::PriceChanged,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_pending());
        }
    }
}
