use crate::{handlers::AppState, models::HealthStatus};
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let store_ok = state.approvals.store_healthy().await;
    let hub = state.hub.stats().await;

    let status = if store_ok { "healthy" } else { "unhealthy" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store_ok,
        active_sessions: hub.active_sessions,
        idle_sessions: hub.idle_sessions,
        connected_members: hub.members,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
