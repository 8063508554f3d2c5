use crate::{
    error::WalletError,
    handlers::AppState,
    models::{ApiResponse, GatewayEvent, SessionEvent},
};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAccepted {
    pub transaction_id: Uuid,
}

/// Gateway webhook. The body has the same shape as a pushed status frame;
/// it is queued for the callback dispatcher and acknowledged with 202.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Json(body): Json<SessionEvent>,
) -> Result<(StatusCode, Json<ApiResponse<CallbackAccepted>>), WalletError> {
    let transaction_id = body.transaction_id;
    let outcome = body.event.into_outcome().map_err(WalletError::InvalidInput)?;

    state
        .gateway_events
        .send(GatewayEvent {
            transaction_id,
            outcome,
        })
        .await
        .map_err(|_| WalletError::Internal("gateway callback dispatcher stopped".to_string()))?;

    tracing::info!(transaction_id = %transaction_id, "Gateway callback queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(CallbackAccepted { transaction_id })),
    ))
}
