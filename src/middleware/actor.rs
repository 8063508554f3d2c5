use crate::error::WalletError;
use axum::{extract::Request, middleware::Next, response::Response};

pub const ACTOR_HEADER: &str = "X-Actor-Id";

/// Identity of whoever is deciding on a transaction, taken from
/// `X-Actor-Id`. Authentication happens upstream of this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub async fn require_actor(mut request: Request, next: Next) -> Result<Response, WalletError> {
    let actor = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| Actor(a.to_string()))
        .ok_or(WalletError::Unauthorized)?;

    tracing::debug!(actor = %actor.0, "Actor extracted");
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}
