use super::transaction::{TransactionStatus, WalletTransaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub is_success: bool,
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(value: T) -> Self {
        Self {
            is_success: true,
            value,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Body of approve/reject/discard responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
}

impl From<&WalletTransaction> for DecisionResult {
    fn from(tx: &WalletTransaction) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
            qr_url: tx.latest_qr_url.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub store: bool,
    pub active_sessions: usize,
    pub idle_sessions: u64,
    pub connected_members: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
