use anyhow::{Context, Result};
use clinic_wallet::client::{
    HttpTransactionFetcher, PaymentSessionController, PaymentUiState, WsTransport,
};
use clinic_wallet::services::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let base_url =
        std::env::var("WALLET_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let transaction_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: payment-watcher <transaction-id> [timeout-secs]")?
        .parse()
        .context("Invalid transaction id")?;
    let wait_secs: u64 = match std::env::args().nth(2) {
        Some(raw) => raw.parse().context("Invalid timeout")?,
        None => 900,
    };

    let ws_url = format!(
        "{}/ws/payments",
        base_url
            .trim_end_matches('/')
            .replacen("http", "ws", 1)
    );

    println!("Payment Watcher");
    println!("===============");
    println!("Server: {}", base_url);
    println!("Transaction: {}", transaction_id);
    println!();

    let mut controller = PaymentSessionController::new(
        WsTransport::new(ws_url),
        HttpTransactionFetcher::new(&base_url),
        RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(8)),
    );

    let watch = controller
        .watch(transaction_id, Duration::from_secs(wait_secs))
        .await;
    controller.close().await;
    let watch = watch?;

    match &watch.state {
        PaymentUiState::Succeeded { amount, .. } => {
            println!("[SUCCESS] Payment confirmed ({})", amount.unwrap_or_default())
        }
        PaymentUiState::Failed { message } => println!("[FAILED] {}", message),
        PaymentUiState::PriceChanged => {
            println!("[PRICE CHANGED] The QR is no longer valid; start a new transaction")
        }
        PaymentUiState::TimedOut => println!("[TIMEOUT] No outcome after {}s", wait_secs),
    }

    if let Some(tx) = &watch.transaction {
        println!();
        println!("{}", serde_json::to_string_pretty(tx)?);
    }

    Ok(())
}
