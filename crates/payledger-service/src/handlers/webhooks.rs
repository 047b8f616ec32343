//! Settlement webhooks pushed by the payment gateways.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use payledger_core::{GatewayRef, SettlementOutcome, SourceKind};
use payledger_engine::{ChargeOutcome, PaymentMethod};

use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Settlement notification body.
#[derive(Debug, Deserialize)]
pub struct SettlementWebhook {
    /// Reference the gateway returned when it accepted the charge.
    pub gateway_ref: String,
    /// Final state of the charge.
    #[serde(flatten)]
    pub outcome: SettlementOutcome,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// Where the charge ended up.
    pub outcome: ChargeOutcome,
}

/// Handle a settlement notification for the `card` or `token` rail.
///
/// Redelivery is safe: a charge is credited at most once. An unknown
/// reference answers 404 so the gateway retries later.
pub async fn settlement_webhook(
    State(state): State<Arc<AppState>>,
    Path(rail): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let kind = match rail.as_str() {
        "card" => SourceKind::CreditCard,
        "token" => SourceKind::CryptoToken,
        other => return Err(ApiError::NotFound(format!("unknown payment rail: {other}"))),
    };

    let Some(secret) = state.webhook_secret(kind) else {
        tracing::warn!(rail = %rail, "Webhook secret not configured - rejecting settlement");
        return Err(ApiError::Unauthorized);
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if !verify_signature(secret, &body, signature) {
        tracing::warn!(rail = %rail, "Invalid webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let webhook: SettlementWebhook =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let gateway_ref =
        GatewayRef::new(webhook.gateway_ref).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        rail = %rail,
        gateway_ref = %gateway_ref,
        outcome = ?webhook.outcome,
        "Received settlement webhook"
    );

    let outcome = match kind {
        SourceKind::CreditCard => {
            state
                .payments
                .credit_cards()
                .on_settlement(&gateway_ref, webhook.outcome)
                .await?
        }
        SourceKind::CryptoToken => {
            state
                .payments
                .crypto_tokens()
                .on_settlement(&gateway_ref, webhook.outcome)
                .await?
        }
    };

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
