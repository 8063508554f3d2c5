use super::transaction::TransactionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the payment gateway eventually reports for a QR payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success {
        amount: u64,
        timestamp: DateTime<Utc>,
    },
    Failure {
        message: String,
    },
    PriceChanged,
}

/// One inbound event on the gateway's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub transaction_id: Uuid,
    pub outcome: GatewayOutcome,
}

/// Status event pushed to clients watching a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusEvent {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub price_changed: bool,
}

impl PaymentStatusEvent {
    pub fn completed(amount: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            amount: Some(amount),
            timestamp: Some(timestamp),
            message: None,
            price_changed: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            amount: None,
            timestamp: None,
            message: Some(message.into()),
            price_changed: false,
        }
    }

    pub fn price_changed() -> Self {
        Self {
            success: false,
            amount: None,
            timestamp: None,
            message: None,
            price_changed: true,
        }
    }

    /// The transaction status a client should show for this event.
    pub fn implied_status(&self) -> TransactionStatus {
        if self.success {
            TransactionStatus::Completed
        } else if self.price_changed {
            TransactionStatus::PriceChanged
        } else {
            TransactionStatus::Failed
        }
    }

    /// Reads the event back as a gateway outcome. Used by the webhook,
    /// which shares the wire shape.
    pub fn into_outcome(self) -> Result<GatewayOutcome, String> {
        if self.price_changed {
            if self.success {
                return Err("priceChanged cannot be combined with success".to_string());
            }
            return Ok(GatewayOutcome::PriceChanged);
        }

        if self.success {
            let amount = self.amount.ok_or("successful payment must carry an amount")?;
            Ok(GatewayOutcome::Success {
                amount,
                timestamp: self.timestamp.unwrap_or_else(Utc::now),
            })
        } else {
            Ok(GatewayOutcome::Failure {
                message: self
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Payment failed".to_string()),
            })
        }
    }
}

impl From<&GatewayOutcome> for PaymentStatusEvent {
    fn from(outcome: &GatewayOutcome) -> Self {
        match outcome {
            GatewayOutcome::Success { amount, timestamp } => Self::completed(*amount, *timestamp),
            GatewayOutcome::Failure { message } => Self::failed(message.clone()),
            GatewayOutcome::PriceChanged => Self::price_changed(),
        }
    }
}

/// A status event addressed to one transaction's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub transaction_id: Uuid,
    #[serde(flatten)]
    pub event: PaymentStatusEvent,
}

/// Frames sent from a client over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { transaction_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Leave { transaction_id: Uuid },
}

/// Frames sent from the server over the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Status(SessionEvent),
    #[serde(rename_all = "camelCase")]
    Joined { transaction_id: Uuid, replayed: bool },
    #[serde(rename_all = "camelCase")]
    Left { transaction_id: Uuid },
    Error { code: String, message: String },
}
