pub mod callback;
pub mod health;
pub mod realtime;
pub mod transactions;

pub use callback::*;
pub use health::*;
pub use realtime::*;
pub use transactions::*;

use crate::middleware::{gateway_key_layer, require_actor};
use crate::services::{ApprovalService, GatewayEventSender, NotificationHub};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub approvals: Arc<ApprovalService>,
    pub hub: Arc<NotificationHub>,
    pub gateway_events: GatewayEventSender,
    pub session_buffer: usize,
    pub started_at: Instant,
}

/// All routes. `webhook_key` guards the gateway callback when set.
pub fn router(state: AppState, webhook_key: Option<Arc<str>>) -> Router {
    let decisions = Router::new()
        .route("/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/withdrawals/:id/reject", post(reject_withdrawal))
        .route("/withdrawals/:id/discard", post(discard_payment))
        .layer(axum_middleware::from_fn(require_actor));

    let callbacks = Router::new()
        .route("/gateway/callback", post(gateway_callback))
        .layer(axum_middleware::from_fn(move |req, next| {
            let key = webhook_key.clone();
            async move { gateway_key_layer(key, req, next).await }
        }));

    Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/clinics/:id/wallet", get(clinic_wallet))
        .route("/ws/payments", get(payments_socket))
        .merge(decisions)
        .merge(callbacks)
        .with_state(state)
}
