//! Settlement webhook integration tests.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::json;

use common::{sign, TestHarness, CARD_SECRET, TOKEN_SECRET};

fn signature_header() -> HeaderName {
    HeaderName::from_static("x-gateway-signature")
}

fn signed(secret: &str, body: &str) -> HeaderValue {
    HeaderValue::from_str(&sign(secret, body)).unwrap()
}

#[tokio::test]
async fn signed_settlement_credits_once() {
    let harness = TestHarness::new().await;
    let gateway_ref = harness.pending_card_charge(1_500).await;
    assert_eq!(harness.balance(), 0);

    let body = json!({ "gateway_ref": gateway_ref.as_str(), "status": "settled" }).to_string();

    // Gateways redeliver; the second delivery must not credit again.
    for _ in 0..2 {
        let response = harness
            .server
            .post("/webhooks/card")
            .add_header(signature_header(), signed(CARD_SECRET, &body))
            .text(body.clone())
            .await;

        response.assert_status_ok();
        let reply: serde_json::Value = response.json();
        assert_eq!(reply["received"], true);
        assert_eq!(reply["outcome"]["status"], "settled");
        assert_eq!(reply["outcome"]["entry"]["amount_cents"], 1_500);
    }

    assert_eq!(harness.balance(), 1_500);
    let snapshot = harness.payments.ledger().snapshot(&harness.account_id).unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn failed_settlement_credits_nothing() {
    let harness = TestHarness::new().await;
    let gateway_ref = harness.pending_card_charge(900).await;

    let body = json!({
        "gateway_ref": gateway_ref.as_str(),
        "status": "failed",
        "reason": "do not honor"
    })
    .to_string();

    let response = harness
        .server
        .post("/webhooks/card")
        .add_header(signature_header(), signed(CARD_SECRET, &body))
        .text(body)
        .await;

    response.assert_status_ok();
    let reply: serde_json::Value = response.json();
    assert_eq!(reply["outcome"]["status"], "failed");
    assert_eq!(reply["outcome"]["reason"], "do not honor");
    assert_eq!(harness.balance(), 0);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let harness = TestHarness::new().await;
    let gateway_ref = harness.pending_card_charge(500).await;
    let body = json!({ "gateway_ref": gateway_ref.as_str(), "status": "settled" }).to_string();

    // Signed with the other rail's secret.
    let response = harness
        .server
        .post("/webhooks/card")
        .add_header(signature_header(), signed(TOKEN_SECRET, &body))
        .text(body.clone())
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // Not signed at all.
    let response = harness.server.post("/webhooks/card").text(body).await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    assert_eq!(harness.balance(), 0);
}

#[tokio::test]
async fn unknown_reference_asks_for_redelivery() {
    let harness = TestHarness::new().await;
    let body = json!({ "gateway_ref": "gw_unknown", "status": "settled" }).to_string();

    let response = harness
        .server
        .post("/webhooks/card")
        .add_header(signature_header(), signed(CARD_SECRET, &body))
        .text(body)
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let reply: serde_json::Value = response.json();
    assert_eq!(reply["error"]["code"], "not_found");
}

#[tokio::test]
async fn card_reference_is_unknown_on_token_rail() {
    let harness = TestHarness::new().await;
    let gateway_ref = harness.pending_card_charge(500).await;
    let body = json!({ "gateway_ref": gateway_ref.as_str(), "status": "settled" }).to_string();

    let response = harness
        .server
        .post("/webhooks/token")
        .add_header(signature_header(), signed(TOKEN_SECRET, &body))
        .text(body)
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(harness.balance(), 0);
}

#[tokio::test]
async fn unknown_rail_and_malformed_body() {
    let harness = TestHarness::new().await;

    let response = harness.server.post("/webhooks/paypal").text("{}").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let body = r#"{"gateway_ref":"gw_1","status":"refunded"}"#;
    let response = harness
        .server
        .post("/webhooks/card")
        .add_header(signature_header(), signed(CARD_SECRET, body))
        .text(body)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
