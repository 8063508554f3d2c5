//! Legal status transitions for wallet transactions and the wallet effect
//! each one has.
//!
//! ```text
//!                    Approve(no QR)
//!   WaitingApproval ───────────────────────────────▶ Completed
//!        │    │                                        ▲
//!        │    │ Approve(QR issued)                     │ GatewaySuccess
//!        │    ▼                                        │
//!        │  WaitingForPayment ─────────────────────────┘
//!        │    │        │
//!        │    │        │ GatewayFailure / Discard
//!        │    │        ▼
//!        │    │      Failed
//!        │    │ GatewayPriceChanged
//!        │    ▼
//!        │  PriceChanged
//!        │ Reject(reason)
//!        ▼
//!     Rejected
//! ```
//!
//! Everything here is pure. The approval service persists the result.

use crate::error::WalletError;
use crate::models::{
    signed_amount, GatewayOutcome, TransactionStatus, TransactionType, WalletEffect,
    WalletTransaction,
};
use chrono::{DateTime, Utc};

/// A QR code issued by the payment gateway for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrIssue {
    pub qr_url: String,
    /// Session reference carried in the QR payload, when the gateway has one.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    Approve { qr: Option<QrIssue> },
    Reject { reason: String },
    GatewaySuccess { amount: u64, timestamp: DateTime<Utc> },
    GatewayFailure { message: String },
    GatewayPriceChanged,
    Discard { reason: String },
}

impl TransactionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionEvent::Approve { .. } => "Approve",
            TransactionEvent::Reject { .. } => "Reject",
            TransactionEvent::GatewaySuccess { .. } => "GatewaySuccess",
            TransactionEvent::GatewayFailure { .. } => "GatewayFailure",
            TransactionEvent::GatewayPriceChanged => "GatewayPriceChanged",
            TransactionEvent::Discard { .. } => "Discard",
        }
    }
}

impl From<GatewayOutcome> for TransactionEvent {
    fn from(outcome: GatewayOutcome) -> Self {
        match outcome {
            GatewayOutcome::Success { amount, timestamp } => {
                TransactionEvent::GatewaySuccess { amount, timestamp }
            }
            GatewayOutcome::Failure { message } => TransactionEvent::GatewayFailure { message },
            GatewayOutcome::PriceChanged => TransactionEvent::GatewayPriceChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub effect: WalletEffect,
}

/// Computes the next status and wallet effect without touching `tx`.
pub fn transition(
    tx: &WalletTransaction,
    event: &TransactionEvent,
) -> Result<Transition, WalletError> {
    use TransactionEvent as E;
    use TransactionStatus as S;

    let to = match (tx.status, event) {
        (S::WaitingApproval, E::Approve { qr: None }) => S::Completed,
        (S::WaitingApproval, E::Approve { qr: Some(_) }) => S::WaitingForPayment,
        (S::WaitingApproval, E::Reject { reason }) => {
            if reason.trim().is_empty() {
                return Err(WalletError::MissingReason);
            }
            S::Rejected
        }
        (S::WaitingForPayment, E::GatewaySuccess { .. }) => S::Completed,
        (S::WaitingForPayment, E::GatewayFailure { .. }) => S::Failed,
        (S::WaitingForPayment, E::GatewayPriceChanged) => S::PriceChanged,
        (S::WaitingForPayment, E::Discard { .. }) => S::Failed,
        (from, event) => {
            return Err(WalletError::InvalidTransition {
                from,
                event: event.name(),
            })
        }
    };

    Ok(Transition {
        from: tx.status,
        to,
        effect: effect_of(tx.type_, tx.amount, to),
    })
}

/// Wallet effect of a transaction of `type_` entering `to`.
fn effect_of(type_: TransactionType, amount: u64, to: TransactionStatus) -> WalletEffect {
    let amount = signed_amount(amount);
    match (type_, to) {
        (TransactionType::Withdrawal, TransactionStatus::Completed) => WalletEffect {
            balance_delta: -amount,
            pending_withdrawals_delta: -amount,
            earnings_delta: 0,
        },
        (
            TransactionType::Withdrawal,
            TransactionStatus::Rejected | TransactionStatus::Failed | TransactionStatus::PriceChanged,
        ) => WalletEffect {
            balance_delta: 0,
            pending_withdrawals_delta: -amount,
            earnings_delta: 0,
        },
        (TransactionType::Deposit, TransactionStatus::Completed) => WalletEffect {
            balance_delta: amount,
            ..WalletEffect::NONE
        },
        (TransactionType::Payment, TransactionStatus::Completed) => WalletEffect {
            balance_delta: amount,
            pending_withdrawals_delta: 0,
            earnings_delta: amount,
        },
        _ => WalletEffect::NONE,
    }
}

/// Applies `event` to `tx`, returning the updated row and its transition.
/// Fields tied to a status are set on entry and cleared on exit.
pub fn apply(
    tx: &WalletTransaction,
    event: TransactionEvent,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(WalletTransaction, Transition), WalletError> {
    let transition = transition(tx, &event)?;
    let mut next = tx.clone();

    next.status = transition.to;
    next.updated_at = now;
    next.latest_qr_url = None;
    next.payment_requested_at = None;
    if let Some(actor) = actor {
        next.reviewed_by = Some(actor.to_string());
    }

    match event {
        TransactionEvent::Approve { qr: Some(qr) } => {
            next.payment_session_id = Some(qr.session_id.unwrap_or_else(|| tx.derived_session_id()));
            next.latest_qr_url = Some(qr.qr_url);
            next.payment_requested_at = Some(now);
        }
        TransactionEvent::Reject { reason } => {
            next.rejection_reason = Some(reason.trim().to_string());
        }
        TransactionEvent::GatewayFailure { message } | TransactionEvent::Discard { reason: message } => {
            next.failure_message = Some(message);
        }
        TransactionEvent::Approve { qr: None }
        | TransactionEvent::GatewaySuccess { .. }
        | TransactionEvent::GatewayPriceChanged => {}
    }

    Ok((next, transition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClinicWalletSummary;
    use uuid::Uuid;

    fn withdrawal(status: TransactionStatus) -> WalletTransaction {
        let mut tx = WalletTransaction::new(Uuid::new_v4(), TransactionType::Withdrawal, 1_000, "payout");
        tx.status = status;
        tx
    }

    fn qr() -> QrIssue {
        QrIssue {
            qr_url: "https://pay/x".to_string(),
            session_id: None,
        }
    }

    fn all_events() -> Vec<TransactionEvent> {
        vec![
            TransactionEvent::Approve { qr: None },
            TransactionEvent::Approve { qr: Some(qr()) },
            TransactionEvent::Reject {
                reason: "missing invoice".to_string(),
            },
            TransactionEvent::GatewaySuccess {
                amount: 1_000,
                timestamp: Utc::now(),
            },
            TransactionEvent::GatewayFailure {
                message: "declined".to_string(),
            },
            TransactionEvent::GatewayPriceChanged,
            TransactionEvent::Discard {
                reason: "abandoned".to_string(),
            },
        ]
    }

    const ALL_STATUSES: [TransactionStatus; 6] = [
        TransactionStatus::WaitingApproval,
        TransactionStatus::WaitingForPayment,
        TransactionStatus::Completed,
        TransactionStatus::Rejected,
        TransactionStatus::Failed,
        TransactionStatus::PriceChanged,
    ];

    fn expected(from: TransactionStatus, event: &TransactionEvent) -> Option<TransactionStatus> {
        use TransactionEvent as E;
        use TransactionStatus as S;
        match (from, event) {
            (S::WaitingApproval, E::Approve { qr: None }) => Some(S::Completed),
            (S::WaitingApproval, E::Approve { qr: Some(_) }) => Some(S::WaitingForPayment),
            (S::WaitingApproval, E::Reject { .. }) => Some(S::Rejected),
            (S::WaitingForPayment, E::GatewaySuccess { .. }) => Some(S::Completed),
            (S::WaitingForPayment, E::GatewayFailure { .. }) => Some(S::Failed),
            (S::WaitingForPayment, E::GatewayPriceChanged) => Some(S::PriceChanged),
            (S::WaitingForPayment, E::Discard { .. }) => Some(S::Failed),
            _ => None,
        }
    }

    #[test]
    fn transition_table_is_total() {
        for from in ALL_STATUSES {
            for event in all_events() {
                let tx = withdrawal(from);
                match (transition(&tx, &event), expected(from, &event)) {
                    (Ok(t), Some(to)) => assert_eq!(t.to, to, "{} + {}", from, event.name()),
                    (Err(WalletError::InvalidTransition { from: f, .. }), None) => assert_eq!(f, from),
                    (other, want) => panic!("{} + {}: got {:?}, want {:?}", from, event.name(), other, want),
                }
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in ALL_STATUSES.into_iter().filter(|s| s.is_terminal()) {
            for event in all_events() {
                assert!(matches!(
                    transition(&withdrawal(from), &event),
                    Err(WalletError::InvalidTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn reject_requires_reason() {
        let tx = withdrawal(TransactionStatus::WaitingApproval);
        let result = transition(&tx, &TransactionEvent::Reject { reason: "   ".to_string() });
        assert!(matches!(result, Err(WalletError::MissingReason)));
    }

    #[test]
    fn withdrawal_effects() {
        let tx = withdrawal(TransactionStatus::WaitingApproval);
        let done = transition(&tx, &TransactionEvent::Approve { qr: None }).unwrap();
        assert_eq!(done.effect.balance_delta, -1_000);
        assert_eq!(done.effect.pending_withdrawals_delta, -1_000);

        let rejected = transition(&tx, &TransactionEvent::Reject { reason: "no".into() }).unwrap();
        assert_eq!(rejected.effect.balance_delta, 0);
        assert_eq!(rejected.effect.pending_withdrawals_delta, -1_000);

        let waiting = transition(&tx, &TransactionEvent::Approve { qr: Some(qr()) }).unwrap();
        assert!(waiting.effect.is_none());

        let waiting_tx = withdrawal(TransactionStatus::WaitingForPayment);
        let price = transition(&waiting_tx, &TransactionEvent::GatewayPriceChanged).unwrap();
        assert_eq!(price.effect.pending_withdrawals_delta, -1_000);
        assert_eq!(price.effect.balance_delta, 0);
    }

    #[test]
    fn effects_match_recomputed_summary() {
        for from in [TransactionStatus::WaitingApproval, TransactionStatus::WaitingForPayment] {
            for type_ in [TransactionType::Withdrawal, TransactionType::Deposit, TransactionType::Payment] {
                for event in all_events() {
                    let mut tx = withdrawal(from);
                    tx.type_ = type_;
                    if from == TransactionStatus::WaitingForPayment {
                        tx.latest_qr_url = Some("https://pay/x".to_string());
                        tx.payment_requested_at = Some(Utc::now());
                    }
                    let Ok((next, t)) = apply(&tx, event, None, Utc::now()) else {
                        continue;
                    };
                    let mut before = ClinicWalletSummary::from_transactions(tx.clinic_id, [&tx]);
                    let after = ClinicWalletSummary::from_transactions(tx.clinic_id, [&next]);
                    before += t.effect;
                    assert_eq!(before, after, "{:?} {} -> {}", type_, from, t.to);
                }
            }
        }
    }

    #[test]
    fn apply_maintains_field_invariants() {
        let tx = withdrawal(TransactionStatus::WaitingApproval);

        let (waiting, _) = apply(&tx, TransactionEvent::Approve { qr: Some(qr()) }, Some("admin"), Utc::now()).unwrap();
        assert!(waiting.check_invariants().is_ok());
        assert_eq!(waiting.latest_qr_url.as_deref(), Some("https://pay/x"));
        assert_eq!(waiting.payment_session_id, Some(tx.id.to_string()));
        assert_eq!(waiting.reviewed_by.as_deref(), Some("admin"));

        let (done, _) = apply(
            &waiting,
            TransactionEvent::GatewaySuccess {
                amount: 1_000,
                timestamp: Utc::now(),
            },
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(done.check_invariants().is_ok());
        assert!(done.latest_qr_url.is_none());
        assert_eq!(done.payment_session_id, Some(tx.id.to_string()));

        let (failed, _) = apply(
            &waiting,
            TransactionEvent::GatewayFailure {
                message: "declined".to_string(),
            },
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(failed.check_invariants().is_ok());
        assert_eq!(failed.failure_message.as_deref(), Some("declined"));

        let (rejected, _) = apply(
            &tx,
            TransactionEvent::Reject {
                reason: " insufficient documentation ".to_string(),
            },
            Some("admin"),
            Utc::now(),
        )
        .unwrap();
        assert!(rejected.check_invariants().is_ok());
        assert_eq!(rejected.rejection_reason.as_deref(), Some("insufficient documentation"));
    }

    #[test]
    fn gateway_session_reference_wins_over_derived_id() {
        let tx = withdrawal(TransactionStatus::WaitingApproval);
        let issue = QrIssue {
            qr_url: "https://pay/y".to_string(),
            session_id: Some("gw-42".to_string()),
        };
        let (next, _) = apply(&tx, TransactionEvent::Approve { qr: Some(issue) }, None, Utc::now()).unwrap();
        assert_eq!(next.payment_session_id.as_deref(), Some("gw-42"));
    }
}
