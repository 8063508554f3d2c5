use crate::{
    error::WalletError,
    handlers::AppState,
    middleware::Actor,
    models::{
        ApiResponse, ClinicWalletSummary, DecisionResult, PagedList, TransactionQuery,
        TransactionStatus, TransactionType, WalletTransaction,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscardRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub clinic_id: Uuid,
    #[serde(rename = "type")]
    pub type_: TransactionType,
    pub amount: u64,
    #[serde(default)]
    pub description: String,
    /// Only `Completed` may be given, for already-settled movements.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub is_system_generated: bool,
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DecisionResult>>, WalletError> {
    let outcome = state.approvals.approve(id, actor.as_str()).await?;
    Ok(Json(ApiResponse::ok(DecisionResult::from(&outcome.transaction))))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<ApiResponse<DecisionResult>>, WalletError> {
    let outcome = state
        .approvals
        .reject(id, actor.as_str(), &body.reason)
        .await?;
    Ok(Json(ApiResponse::ok(DecisionResult::from(&outcome.transaction))))
}

pub async fn discard_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    body: Option<Json<DiscardRequest>>,
) -> Result<Json<ApiResponse<DecisionResult>>, WalletError> {
    let reason = body
        .and_then(|Json(body)| body.reason)
        .unwrap_or_default();
    let outcome = state
        .approvals
        .discard(id, actor.as_str(), &reason)
        .await?;
    Ok(Json(ApiResponse::ok(DecisionResult::from(&outcome.transaction))))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    Json(body): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<WalletTransaction>>), WalletError> {
    let mut tx = WalletTransaction::new(body.clinic_id, body.type_, body.amount, body.description);
    if let Some(status) = body.status {
        tx.status = status;
    }
    tx.is_system_generated = body.is_system_generated;

    let tx = state.approvals.ingest(tx).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(tx))))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WalletTransaction>>, WalletError> {
    let tx = state.approvals.get(id).await?;
    Ok(Json(ApiResponse::ok(tx)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<ApiResponse<PagedList<WalletTransaction>>>, WalletError> {
    let page = state.approvals.list(&query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn clinic_wallet(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ClinicWalletSummary>>, WalletError> {
    let summary = state.approvals.wallet_summary(clinic_id).await?;
    Ok(Json(ApiResponse::ok(summary)))
}
