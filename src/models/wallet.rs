use super::transaction::{TransactionStatus, TransactionType, WalletTransaction};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use uuid::Uuid;

/// Aggregates over a clinic's transactions. Never stored; always rebuilt
/// from the transaction history so it cannot drift from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicWalletSummary {
    pub clinic_id: Uuid,
    pub balance: i64,
    pub pending_withdrawals: i64,
    pub total_earnings: i64,
    pub transaction_count: usize,
}

impl ClinicWalletSummary {
    pub fn from_transactions<'a>(
        clinic_id: Uuid,
        transactions: impl IntoIterator<Item = &'a WalletTransaction>,
    ) -> Self {
        let mut summary = Self {
            clinic_id,
            balance: 0,
            pending_withdrawals: 0,
            total_earnings: 0,
            transaction_count: 0,
        };

        for tx in transactions.into_iter().filter(|tx| tx.clinic_id == clinic_id) {
            summary.transaction_count += 1;
            let amount = signed_amount(tx.amount);
            match (tx.type_, tx.status) {
                (TransactionType::Withdrawal, TransactionStatus::Completed) => {
                    summary.balance = summary.balance.saturating_sub(amount)
                }
                (TransactionType::Withdrawal, status) if status.is_pending() => {
                    summary.pending_withdrawals = summary.pending_withdrawals.saturating_add(amount)
                }
                (TransactionType::Deposit, TransactionStatus::Completed) => {
                    summary.balance = summary.balance.saturating_add(amount)
                }
                (TransactionType::Payment, TransactionStatus::Completed) => {
                    summary.balance = summary.balance.saturating_add(amount);
                    summary.total_earnings = summary.total_earnings.saturating_add(amount);
                }
                _ => {}
            }
        }

        summary
    }
}

/// `amount` as a signed aggregate term, clamped to `i64::MAX`.
pub fn signed_amount(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// Change to a clinic's aggregates caused by one status transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletEffect {
    pub balance_delta: i64,
    pub pending_withdrawals_delta: i64,
    pub earnings_delta: i64,
}

impl WalletEffect {
    pub const NONE: Self = Self {
        balance_delta: 0,
        pending_withdrawals_delta: 0,
        earnings_delta: 0,
    };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl AddAssign<WalletEffect> for ClinicWalletSummary {
    fn add_assign(&mut self, effect: WalletEffect) {
        self.balance = self.balance.saturating_add(effect.balance_delta);
        self.pending_withdrawals = self
            .pending_withdrawals
            .saturating_add(effect.pending_withdrawals_delta);
        self.total_earnings = self.total_earnings.saturating_add(effect.earnings_delta);
    }
}
