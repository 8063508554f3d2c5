use anyhow::{Context, Result};
use clinic_wallet::{
    config::{Config, StoreBackend},
    handlers::{router, AppState},
    services::*,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting clinic wallet service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let store: Arc<dyn TransactionStore> = match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory transaction store; data is lost on restart");
            Arc::new(InMemoryTransactionStore::new())
        }
        StoreBackend::Redis => Arc::new(RedisTransactionStore::new(&config.redis_url).await?),
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.gateway_url {
        Some(url) => {
            tracing::info!(gateway_url = %url, "Using HTTP payment gateway");
            Arc::new(
                HttpPaymentGateway::new(
                    url.clone(),
                    config.gateway_api_key.clone(),
                    config.gateway_timeout,
                    config.gateway_retry_policy(),
                )
                .context("Could not build payment gateway client")?,
            )
        }
        None => {
            tracing::info!("No GATEWAY_URL; approvals settle directly");
            Arc::new(DirectSettlementGateway)
        }
    };

    let hub = Arc::new(NotificationHub::new(config.session_idle_ttl));
    let approvals = Arc::new(ApprovalService::new(store, gateway, hub.clone()));

    let (gateway_events, gateway_event_rx) = gateway_event_channel(config.gateway_event_buffer);
    tokio::spawn(run_callback_dispatcher(gateway_event_rx, approvals.clone()));

    if config.expiry_enabled() {
        let monitor = ExpiryMonitor::new(
            approvals.clone(),
            config.payment_window,
            config.expiry_sweep,
        );
        tokio::spawn(monitor.run());
    } else {
        tracing::info!("Payment expiry disabled");
    }

    let state = AppState {
        approvals,
        hub,
        gateway_events,
        session_buffer: config.session_buffer,
        started_at: Instant::now(),
    };

    let webhook_key = config.gateway_webhook_key.as_deref().map(Arc::<str>::from);
    let app = router(state, webhook_key)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Could not bind {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Payment channel: ws://{}/ws/payments", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
