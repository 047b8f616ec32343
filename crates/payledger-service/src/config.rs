//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use payledger_core::{LedgerError, Result};
use payledger_engine::EngineConfig;

/// Storage engine backing the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process maps; nothing survives a restart.
    Memory,
    /// `RocksDB` under `data_dir`.
    Rocks,
}

impl FromStr for StoreBackend {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::Rocks),
            other => Err(LedgerError::Configuration(format!(
                "unknown STORE_BACKEND: {other}"
            ))),
        }
    }
}

/// Connection settings for one payment gateway.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    /// Gateway API base URL.
    pub base_url: String,
    /// Bearer token for the gateway API.
    pub api_key: String,
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/payledger").
    pub data_dir: String,

    /// Storage engine (default: `RocksDB` when compiled in, memory otherwise).
    pub store_backend: StoreBackend,

    /// How long a charge waits for settlement before reporting pending.
    pub charge_wait_ms: u64,

    /// Attempts per ledger append before a conflict surfaces.
    pub append_max_attempts: u32,

    /// Interval of the coupon expiry sweep.
    pub coupon_sweep_seconds: u64,

    /// Interval of the pending-charge reconciliation poll.
    pub reconcile_seconds: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// JSON rate table; the built-in rates apply when unset.
    pub rate_table_path: Option<String>,

    /// Card gateway (optional).
    pub card_gateway: Option<GatewayEndpoint>,

    /// Token gateway (optional).
    pub token_gateway: Option<GatewayEndpoint>,

    /// Secret verifying card settlement webhooks (optional).
    pub card_webhook_secret: Option<String>,

    /// Secret verifying token settlement webhooks (optional).
    pub token_webhook_secret: Option<String>,
}

/// Gateway secrets file structure.
#[derive(Debug, Default, Deserialize)]
struct GatewaySecrets {
    #[serde(default)]
    card_api_key: Option<String>,
    #[serde(default)]
    card_webhook_secret: Option<String>,
    #[serde(default)]
    token_api_key: Option<String>,
    #[serde(default)]
    token_webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the secrets file.
    #[must_use]
    pub fn from_env() -> Self {
        let secrets = load_gateway_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            store_backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring STORE_BACKEND");
                        None
                    }
                })
                .unwrap_or(defaults.store_backend),
            charge_wait_ms: env_parse("CHARGE_WAIT_MS").unwrap_or(defaults.charge_wait_ms),
            append_max_attempts: env_parse("APPEND_MAX_ATTEMPTS")
                .unwrap_or(defaults.append_max_attempts),
            coupon_sweep_seconds: env_parse("COUPON_SWEEP_SECONDS")
                .unwrap_or(defaults.coupon_sweep_seconds),
            reconcile_seconds: env_parse("RECONCILE_SECONDS").unwrap_or(defaults.reconcile_seconds),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            rate_table_path: std::env::var("RATE_TABLE_PATH").ok(),
            card_gateway: gateway_endpoint("CARD_GATEWAY_URL", secrets.card_api_key),
            token_gateway: gateway_endpoint("TOKEN_GATEWAY_URL", secrets.token_api_key),
            card_webhook_secret: secrets.card_webhook_secret,
            token_webhook_secret: secrets.token_webhook_secret,
        }
    }

    /// Engine settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the rate table cannot be loaded
    /// or a setting is out of range.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig {
            charge_wait: Duration::from_millis(self.charge_wait_ms),
            append_max_attempts: self.append_max_attempts,
            ..EngineConfig::default()
        };
        if let Some(path) = &self.rate_table_path {
            config.rates = EngineConfig::load_rates(Path::new(path))?;
        }
        config.validate()?;
        Ok(config)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/payledger".into(),
            store_backend: if cfg!(feature = "rocksdb-backend") {
                StoreBackend::Rocks
            } else {
                StoreBackend::Memory
            },
            charge_wait_ms: 30_000,
            append_max_attempts: 5,
            coupon_sweep_seconds: 300,
            reconcile_seconds: 60,
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 30,
            rate_table_path: None,
            card_gateway: None,
            token_gateway: None,
            card_webhook_secret: None,
            token_webhook_secret: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value = %value, "Ignoring unparsable setting");
            None
        }
    }
}

fn gateway_endpoint(url_var: &str, api_key: Option<String>) -> Option<GatewayEndpoint> {
    let base_url = std::env::var(url_var).ok()?;
    let Some(api_key) = api_key else {
        tracing::warn!(var = url_var, "Gateway URL set without an API key");
        return None;
    };
    Some(GatewayEndpoint { base_url, api_key })
}

/// Load gateway secrets from file, falling back to environment variables.
fn load_gateway_secrets() -> GatewaySecrets {
    let secret_paths = [
        ".secrets/gateways.json",
        "payledger/.secrets/gateways.json",
        "../.secrets/gateways.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded gateway secrets from file");
            return secrets;
        }
    }

    tracing::debug!("Gateway secrets file not found, using environment variables");
    GatewaySecrets {
        card_api_key: std::env::var("CARD_GATEWAY_API_KEY").ok(),
        card_webhook_secret: std::env::var("CARD_WEBHOOK_SECRET").ok(),
        token_api_key: std::env::var("TOKEN_GATEWAY_API_KEY").ok(),
        token_webhook_secret: std::env::var("TOKEN_WEBHOOK_SECRET").ok(),
    }
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> std::io::Result<T> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
