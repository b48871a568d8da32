mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use url::Url;

use common::{spawn_app, spawn_app_with_secrets, RETURN_URL, TENANT, UNSEALED_TENANT};
use paybridge_core::domain::reference::derive;
use paybridge_core::domain::SharedSecret;
use paybridge_core::ports::TransactionRepository;
use paybridge_core::secrets::{SecretError, SecretStore};

/// Secret store whose reads never complete.
struct StalledSecretStore;

#[async_trait]
impl SecretStore for StalledSecretStore {
    async fn fetch(&self, _secret_ref: &str) -> Result<SharedSecret, SecretError> {
        std::future::pending().await
    }
}

fn sale_request(transaction_id: &str, amount: &str) -> serde_json::Value {
    json!({
        "transaction_id": transaction_id,
        "tenant_id": TENANT,
        "amount": amount,
        "currency": "usd",
        "kind": "SALE",
        "return_url": RETURN_URL,
    })
}

#[tokio::test]
async fn test_form_carries_derived_reference_and_callback() {
    let mut app = spawn_app().await;
    let token = app
        .gateway
        .mock("POST", "/v1/tokens")
        .match_header("X-Gateway-Signature", mockito::Matcher::Any)
        .match_body(mockito::Matcher::PartialJson(json!({
            "account_id": "100200",
            "site_id": "300",
            "transaction_type": "SALE",
            "amount": 2500,
            "currency": "USD",
            "reference": derive("t-100").value(),
        })))
        .with_status(200)
        .with_body(json!({ "token": "redirect-tok-1" }).to_string())
        .expect(1)
        .create_async()
        .await;

    let (status, form) = app.post_json("/forms", sale_request("t-100", "25.00")).await;

    assert_eq!(status, StatusCode::OK, "{}", form);
    token.assert_async().await;
    assert_eq!(form["reference"], json!(derive("t-100").value()));
    assert_eq!(form["token"], "redirect-tok-1");
    assert_eq!(form["account_id"], "100200");
    assert_eq!(form["site_id"], "300");
    assert_eq!(form["amount_minor"], 2500);
    assert_eq!(form["currency"], "USD");
    assert_eq!(form["post_url"], format!("{}/v1/pay", app.gateway.url()));

    let callback = Url::parse(form["callback_url"].as_str().unwrap()).unwrap();
    assert_eq!(callback.path(), "/callback");
    let params: Vec<(String, String)> = callback.query_pairs().into_owned().collect();
    assert!(params.contains(&("txn_id".to_string(), "t-100".to_string())));
    assert!(params.contains(&("tenant_id".to_string(), TENANT.to_string())));
    assert!(params.contains(&("kind".to_string(), "SALE".to_string())));

    let row = app.ledger.get_by_id("t-100").await.unwrap().unwrap();
    assert!(row.is_pending());
    assert_eq!(row.gateway_reference, derive("t-100"));
}

#[tokio::test]
async fn test_repeated_request_reuses_the_row() {
    let mut app = spawn_app().await;
    let token = app.mock_token_hits("redirect-tok", 2).await;

    let (first_status, first) = app.post_json("/forms", sale_request("t-100", "25.00")).await;
    let (second_status, second) = app.post_json("/forms", sale_request("t-100", "25.00")).await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["reference"], second["reference"]);
    assert_eq!(app.ledger.len().await, 1);
    token.assert_async().await;
}

#[tokio::test]
async fn test_token_exchange_failure_leaves_no_row() {
    let mut app = spawn_app().await;
    let _token = app
        .gateway
        .mock("POST", "/v1/tokens")
        .with_status(500)
        .create_async()
        .await;

    let (status, body) = app.post_json("/forms", sale_request("t-200", "10.00")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Payment gateway unavailable");
    assert!(app.ledger.is_empty().await);
}

#[tokio::test]
async fn test_inactive_and_unknown_tenants_are_refused() {
    let mut app = spawn_app().await;
    let token = app.mock_token_hits("never-issued", 0).await;

    let mut request = sale_request("t-300", "10.00");
    request["tenant_id"] = json!(common::INACTIVE_TENANT);
    let (status, _) = app.post_json("/forms", request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut request = sale_request("t-301", "10.00");
    request["tenant_id"] = json!("nobody");
    let (status, _) = app.post_json("/forms", request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    token.assert_async().await;
    assert!(app.ledger.is_empty().await);
}

#[tokio::test]
async fn test_reusing_an_id_with_other_terms_conflicts() {
    let mut app = spawn_app().await;
    let _token = app.mock_token("redirect-tok").await;

    let (status, _) = app.post_json("/forms", sale_request("t-400", "25.00")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.post_json("/forms", sale_request("t-400", "30.00")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let row = app.ledger.get_by_id("t-400").await.unwrap().unwrap();
    assert_eq!(row.amount_minor, 2500);
}

#[tokio::test]
async fn test_missing_secret_fails_without_gateway_contact() {
    let mut app = spawn_app().await;
    let token = app.mock_token_hits("never-issued", 0).await;

    let mut request = sale_request("t-210", "10.00");
    request["tenant_id"] = json!(UNSEALED_TENANT);
    let (status, body) = app.post_json("/forms", request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Payment gateway unavailable");
    assert!(!body.to_string().contains("tenants/"));
    token.assert_async().await;
    assert!(app.ledger.is_empty().await);
}

#[tokio::test]
async fn test_stalled_secret_store_hits_the_form_deadline() {
    let mut app =
        spawn_app_with_secrets(Arc::new(StalledSecretStore), Duration::from_millis(200)).await;
    let token = app.mock_token_hits("never-issued", 0).await;

    let started = std::time::Instant::now();
    let (status, body) = app.post_json("/forms", sale_request("t-220", "10.00")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Payment gateway unavailable");
    assert!(started.elapsed() < Duration::from_secs(2));
    token.assert_async().await;
    assert!(app.ledger.is_empty().await);
}

#[tokio::test]
async fn test_retry_with_another_return_url_conflicts() {
    let mut app = spawn_app().await;
    let _token = app.mock_token("redirect-tok").await;

    let (status, _) = app.post_json("/forms", sale_request("t-450", "25.00")).await;
    assert_eq!(status, StatusCode::OK);

    let mut retry = sale_request("t-450", "25.00");
    retry["return_url"] = json!("https://elsewhere.example.net/done");
    let (status, _) = app.post_json("/forms", retry).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let row = app.ledger.get_by_id("t-450").await.unwrap().unwrap();
    assert_eq!(row.return_url.as_deref(), Some(RETURN_URL));
}

#[tokio::test]
async fn test_finalized_transaction_cannot_get_a_new_form() {
    let mut app = spawn_app().await;
    let form = app.open_form("t-500", "SALE", "12.00").await;
    app.approve(&form, "PM-TOKEN-0500").await;

    let _token = app.mock_token("redirect-again").await;
    let (status, _) = app.post_json("/forms", sale_request("t-500", "12.00")).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_before_the_gateway() {
    let mut app = spawn_app().await;
    let token = app.mock_token_hits("never-issued", 0).await;

    let cases = [
        json!({ "tenant_id": TENANT, "amount": "1.00", "currency": "USD", "kind": "SALE", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "1.001", "currency": "USD", "kind": "SALE", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "-1", "currency": "USD", "kind": "SALE", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "1.00", "currency": "XXX", "kind": "SALE", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "1.00", "currency": "USD", "kind": "REFUND", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "1.00", "currency": "USD", "kind": "SALE", "return_url": "ftp://shop.example.com" }),
        json!({ "transaction_id": "t-1", "tenant_id": TENANT, "amount": "1.00", "currency": "USD", "kind": "STORAGE", "return_url": RETURN_URL }),
        json!({ "transaction_id": "t 1", "tenant_id": TENANT, "amount": "1.00", "currency": "USD", "kind": "SALE", "return_url": RETURN_URL }),
    ];

    for request in cases {
        let (status, body) = app.post_json("/forms", request.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", request, body);
    }

    token.assert_async().await;
    assert!(app.ledger.is_empty().await);
}

#[tokio::test]
async fn test_storage_form_echoes_customer() {
    let mut app = spawn_app().await;
    let form = app.open_form("s-100", "STORAGE", "0.00").await;

    let params = common::callback_fields(&form);
    assert!(params.contains(&("customer_id".to_string(), "c-1".to_string())));
    assert!(params.contains(&("kind".to_string(), "STORAGE".to_string())));
}
