//! HTTP payment gateway client.
//!
//! Speaks a small JSON protocol:
//!
//! - `POST {base}/v1/charges` with a [`ChargeRequest`] body returns
//!   `{"gateway_ref": "..."}`. The charge's idempotency key is also sent as
//!   the `Idempotency-Key` header so gateway-side retries are deduplicated.
//! - `GET {base}/v1/charges/{gateway_ref}` returns `{"status": "pending"}`,
//!   `{"status": "settled"}` or `{"status": "failed", "reason": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use payledger_core::{GatewayRef, LedgerError, Result, SettlementOutcome, SourceKind};
use payledger_engine::{ChargeRequest, PaymentGateway};

/// Error type for gateway HTTP calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error status.
    #[error("gateway API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<GatewayClientError> for LedgerError {
    fn from(err: GatewayClientError) -> Self {
        match err {
            GatewayClientError::Api { status, message } if retryable_status(status) => {
                Self::GatewayUnreachable(format!("HTTP {status}: {message}"))
            }
            GatewayClientError::Api { message, .. } => Self::Gateway(message),
            GatewayClientError::Configuration(msg) => Self::Configuration(msg),
            GatewayClientError::Http(e) => Self::GatewayUnreachable(e.to_string()),
        }
    }
}

/// Statuses that say nothing about whether the gateway acted on the request.
const fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    gateway_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
enum StatusResponse {
    Pending,
    Settled,
    Failed {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// Payment gateway reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    kind: SourceKind,
    poll_interval: Duration,
}

impl HttpGateway {
    /// Default delay between settlement polls while waiting.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Create a client for the `kind` gateway at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        kind: SourceKind,
    ) -> std::result::Result<Self, GatewayClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            kind,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the delay between settlement polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn submit(&self, request: &ChargeRequest) -> std::result::Result<String, GatewayClientError> {
        let url = format!("{}/v1/charges", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(request)
            .send()
            .await?;

        self.handle_response::<SubmitResponse>(response)
            .await
            .map(|r| r.gateway_ref)
    }

    async fn status(
        &self,
        gateway_ref: &GatewayRef,
    ) -> std::result::Result<StatusResponse, GatewayClientError> {
        let url = format!("{}/v1/charges/{}", self.base_url, gateway_ref);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<T, GatewayClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error.message,
            Err(_) => format!("HTTP {status}"),
        };
        tracing::debug!(
            kind = self.kind.as_str(),
            status = status.as_u16(),
            message = %message,
            "Gateway returned an error"
        );
        Err(GatewayClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn outcome(status: StatusResponse) -> Option<SettlementOutcome> {
    match status {
        StatusResponse::Pending => None,
        StatusResponse::Settled => Some(SettlementOutcome::Settled),
        StatusResponse::Failed { reason } => Some(SettlementOutcome::Failed {
            reason: reason.unwrap_or_else(|| "failed at gateway".into()),
        }),
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn submit_charge(&self, request: &ChargeRequest) -> Result<GatewayRef> {
        let gateway_ref = self.submit(request).await?;
        GatewayRef::new(gateway_ref).map_err(|e| {
            LedgerError::GatewayUnreachable(format!("gateway returned an unusable reference: {e}"))
        })
    }

    async fn await_settlement(&self, gateway_ref: &GatewayRef) -> Result<SettlementOutcome> {
        loop {
            if let Some(outcome) = self.settlement_status(gateway_ref).await? {
                return Ok(outcome);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn settlement_status(&self, gateway_ref: &GatewayRef) -> Result<Option<SettlementOutcome>> {
        Ok(outcome(self.status(gateway_ref).await?))
    }
}
