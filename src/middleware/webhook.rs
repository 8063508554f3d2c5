use crate::error::WalletError;
use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;

pub const GATEWAY_KEY_HEADER: &str = "X-Gateway-Key";

/// Admits gateway callbacks carrying the shared webhook key. With no key
/// configured every callback is admitted.
pub async fn gateway_key_layer(
    expected: Option<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<Response, WalletError> {
    if let Some(expected) = expected {
        let presented = request
            .headers()
            .get(GATEWAY_KEY_HEADER)
            .and_then(|h| h.to_str().ok());

        if presented != Some(expected.as_ref()) {
            tracing::warn!("Gateway callback with missing or wrong key");
            return Err(WalletError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}
