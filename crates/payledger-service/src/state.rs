//! Application state.

use std::sync::Arc;

use payledger_core::{Result, SourceKind};
use payledger_engine::{
    OpenDirectory, PaymentGateway, Payments, RecordedUsage, UnconfiguredGateway, UsageSource,
};
use payledger_store::{MemoryStore, Store};

use crate::config::{GatewayEndpoint, ServiceConfig, StoreBackend};
use crate::gateway::HttpGateway;

/// Application state shared across handlers and workers.
#[derive(Clone)]
pub struct AppState {
    /// The assembled ledger.
    pub payments: Arc<Payments>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(payments: Arc<Payments>, config: ServiceConfig) -> Self {
        Self { payments, config }
    }

    /// Wire the ledger over `store` using the gateways named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the engine settings or a
    /// gateway client are invalid.
    pub fn build(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let engine_config = config.engine_config()?;
        let card_gateway = gateway(config.card_gateway.as_ref(), SourceKind::CreditCard)?;
        let token_gateway = gateway(config.token_gateway.as_ref(), SourceKind::CryptoToken)?;
        let usage: Arc<dyn UsageSource> = Arc::new(RecordedUsage::new());

        let payments = Payments::new(
            store,
            Arc::new(OpenDirectory),
            usage,
            card_gateway,
            token_gateway,
            engine_config,
        )?;

        Ok(Self::new(Arc::new(payments), config))
    }

    /// Webhook secret for the `kind` rail, if configured.
    #[must_use]
    pub fn webhook_secret(&self, kind: SourceKind) -> Option<&str> {
        match kind {
            SourceKind::CreditCard => self.config.card_webhook_secret.as_deref(),
            SourceKind::CryptoToken => self.config.token_webhook_secret.as_deref(),
        }
    }
}

/// Open the storage engine selected by `config`.
///
/// # Errors
///
/// - `LedgerError::Storage` if the `RocksDB` directory cannot be opened.
/// - `LedgerError::Configuration` if `RocksDB` was selected but not compiled in.
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - ledger is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StoreBackend::Rocks => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            let store = payledger_store::RocksStore::open(&config.data_dir)?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StoreBackend::Rocks => Err(payledger_core::LedgerError::Configuration(
            "STORE_BACKEND=rocksdb requires the rocksdb-backend feature".into(),
        )),
    }
}

fn gateway(endpoint: Option<&GatewayEndpoint>, kind: SourceKind) -> Result<Arc<dyn PaymentGateway>> {
    match endpoint {
        Some(endpoint) => {
            let client = HttpGateway::new(&endpoint.base_url, &endpoint.api_key, kind)?;
            tracing::info!(kind = kind.as_str(), url = %endpoint.base_url, "Gateway enabled");
            Ok(Arc::new(client))
        }
        None => {
            tracing::warn!(
                kind = kind.as_str(),
                "Gateway not configured - charges on this rail will fail"
            );
            Ok(Arc::new(UnconfiguredGateway::new(kind)))
        }
    }
}
