use crate::services::RetryPolicy;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Transaction store
    pub store_backend: StoreBackend,
    pub redis_url: String,

    // Payment gateway; no URL means direct settlement
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub gateway_webhook_key: Option<String>,
    pub gateway_timeout: Duration,
    pub gateway_max_attempts: u32,
    pub gateway_initial_backoff: Duration,
    pub gateway_max_backoff: Duration,
    pub gateway_event_buffer: usize,

    // Notification hub
    pub session_idle_ttl: Duration,
    pub session_buffer: usize,

    // Payment expiry; a zero window disables the monitor
    pub payment_window: Duration,
    pub expiry_sweep: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            environment: Self::parse_environment()?,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_var("PORT", 8080)?,

            store_backend: Self::parse_store_backend()?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            gateway_url: Self::optional_var("GATEWAY_URL"),
            gateway_api_key: Self::optional_var("GATEWAY_API_KEY"),
            gateway_webhook_key: Self::optional_var("GATEWAY_WEBHOOK_KEY"),
            gateway_timeout: Duration::from_secs(Self::parse_var("GATEWAY_TIMEOUT_SECS", 10)?),
            gateway_max_attempts: Self::parse_var("GATEWAY_MAX_ATTEMPTS", 3)?,
            gateway_initial_backoff: Duration::from_millis(Self::parse_var(
                "GATEWAY_INITIAL_BACKOFF_MS",
                250,
            )?),
            gateway_max_backoff: Duration::from_millis(Self::parse_var(
                "GATEWAY_MAX_BACKOFF_MS",
                5_000,
            )?),
            gateway_event_buffer: Self::parse_var("GATEWAY_EVENT_BUFFER", 256)?,

            session_idle_ttl: Duration::from_secs(Self::parse_var("SESSION_IDLE_TTL_SECS", 600)?),
            session_buffer: Self::parse_var("SESSION_BUFFER", 32)?,

            payment_window: Duration::from_secs(Self::parse_var("PAYMENT_WINDOW_SECS", 900)?),
            expiry_sweep: Duration::from_secs(Self::parse_var("EXPIRY_SWEEP_SECS", 30)?),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_store_backend() -> Result<StoreBackend> {
        let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => bail!("Unknown STORE_BACKEND: {}", backend),
        }
    }

    fn optional_var(var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }

    fn parse_var<T>(var: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(var) {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}", var)),
            Err(_) => Ok(default),
        }
    }

    pub fn gateway_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.gateway_max_attempts,
            self.gateway_initial_backoff,
            self.gateway_max_backoff,
        )
    }

    pub fn expiry_enabled(&self) -> bool {
        !self.payment_window.is_zero()
    }

    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.gateway_url {
            if !url.starts_with("http") {
                bail!("GATEWAY_URL must be HTTP(S) URL");
            }
        }
        if self.store_backend == StoreBackend::Redis && !self.redis_url.starts_with("redis") {
            bail!("REDIS_URL must be a redis:// URL");
        }
        if self.gateway_max_attempts == 0 {
            bail!("GATEWAY_MAX_ATTEMPTS must be at least 1");
        }
        if self.session_buffer == 0 {
            bail!("SESSION_BUFFER must be at least 1");
        }
        if self.expiry_enabled() && self.expiry_sweep.is_zero() {
            bail!("EXPIRY_SWEEP_SECS must be positive while PAYMENT_WINDOW_SECS is set");
        }
        if self.environment == Environment::Production && self.gateway_webhook_key.is_none() {
            bail!("GATEWAY_WEBHOOK_KEY required in production");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}
