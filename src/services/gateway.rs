use crate::error::WalletError;
use crate::models::GatewayEvent;
use crate::services::approval::ApprovalService;
use crate::services::retry::RetryPolicy;
use crate::services::state_machine::QrIssue;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bank payment gateway as seen by the approval workflow.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Asks for a payment QR code. `Ok(None)` means the gateway settled the
    /// transfer without a QR step.
    async fn request_qr(&self, transaction_id: Uuid, amount: u64)
        -> Result<Option<QrIssue>, WalletError>;
}

/// For deployments without bank QR payments: every approval settles at once.
pub struct DirectSettlementGateway;

#[async_trait]
impl PaymentGateway for DirectSettlementGateway {
    async fn request_qr(
        &self,
        transaction_id: Uuid,
        amount: u64,
    ) -> Result<Option<QrIssue>, WalletError> {
        tracing::debug!(transaction_id = %transaction_id, amount, "Direct settlement, no QR");
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QrRequest {
    transaction_id: Uuid,
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrResponse {
    #[serde(default)]
    qr_url: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug)]
enum CallError {
    Transient(String),
    Permanent(String),
}

impl CallError {
    fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transient(msg) | CallError::Permanent(msg) => f.write_str(msg),
        }
    }
}

/// Pulls the session reference out of a QR URL's `session` query parameter.
fn session_from_qr_url(qr_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(qr_url).ok()?;
    let session = url
        .query_pairs()
        .find(|(key, _)| key == "session")
        .map(|(_, value)| value.into_owned());
    session.filter(|s| !s.is_empty())
}

pub struct HttpPaymentGateway {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            retry,
        })
    }

    async fn call_once(&self, request: &QrRequest) -> Result<Option<QrIssue>, CallError> {
        let mut builder = self
            .client
            .post(format!("{}/payments/qr", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Api-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::Transient(format!("gateway returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Permanent(format!("gateway returned {}: {}", status, body)));
        }

        let body: QrResponse = response
            .json()
            .await
            .map_err(|e| CallError::Permanent(format!("unreadable gateway response: {}", e)))?;

        Ok(body.qr_url.filter(|url| !url.trim().is_empty()).map(|qr_url| {
            let session_id = body
                .session_id
                .filter(|s| !s.is_empty())
                .or_else(|| session_from_qr_url(&qr_url));
            QrIssue { qr_url, session_id }
        }))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn request_qr(
        &self,
        transaction_id: Uuid,
        amount: u64,
    ) -> Result<Option<QrIssue>, WalletError> {
        let request = QrRequest {
            transaction_id,
            amount,
        };

        let issue = self
            .retry
            .retry("QR request", CallError::is_transient, || self.call_once(&request))
            .await
            .map_err(|e| WalletError::GatewayUnavailable(e.to_string()))?;

        tracing::info!(
            transaction_id = %transaction_id,
            amount,
            qr_issued = issue.is_some(),
            "Payment gateway answered QR request"
        );
        Ok(issue)
    }
}

/// Sending side of the gateway's inbound event stream.
pub type GatewayEventSender = mpsc::Sender<GatewayEvent>;

pub fn gateway_event_channel(buffer: usize) -> (GatewayEventSender, mpsc::Receiver<GatewayEvent>) {
    mpsc::channel(buffer.max(1))
}

/// Feeds gateway events into the approval service one at a time until every
/// sender is gone.
pub async fn run_callback_dispatcher(
    mut events: mpsc::Receiver<GatewayEvent>,
    approvals: Arc<ApprovalService>,
) {
    tracing::info!("Gateway callback dispatcher started");

    while let Some(event) = events.recv().await {
        let transaction_id = event.transaction_id;
        match approvals
            .handle_gateway_callback(transaction_id, event.outcome)
            .await
        {
            Ok(tx) => tracing::info!(
                transaction_id = %transaction_id,
                status = %tx.status,
                "Gateway callback applied"
            ),
            Err(e) => tracing::warn!(
                transaction_id = %transaction_id,
                error = %e,
                "Gateway callback discarded"
            ),
        }
    }

    tracing::info!("Gateway callback dispatcher stopped");
}
