#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use tower::ServiceExt;
use url::Url;

use paybridge_core::adapters::{
    InMemoryPaymentMethodRepository, InMemoryTenantRepository, InMemoryTransactionRepository,
};
use paybridge_core::domain::{GatewayEnvironment, TenantCredentials};
use paybridge_core::gateway::GatewayClient;
use paybridge_core::secrets::{SecretStore, StaticSecretStore};
use paybridge_core::services::PaymentMethodCapture;
use paybridge_core::{create_app, AppState, Dependencies};

pub const TENANT: &str = "m1";
pub const INACTIVE_TENANT: &str = "m-closed";
pub const OTHER_TENANT: &str = "m2";
/// Active tenant whose secret reference resolves to nothing.
pub const UNSEALED_TENANT: &str = "m-nosecret";
pub const SHARED_SECRET: &str = "s3cret-m1";
pub const PUBLIC_BASE_URL: &str = "https://pay.example.com";
pub const RETURN_URL: &str = "https://shop.example.com/done";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub ledger: InMemoryTransactionRepository,
    pub payment_methods: InMemoryPaymentMethodRepository,
    pub gateway: mockito::ServerGuard,
}

pub fn tenant(tenant_id: &str, active: bool) -> TenantCredentials {
    let now = Utc::now();
    TenantCredentials {
        tenant_id: tenant_id.to_string(),
        display_name: format!("Merchant {}", tenant_id),
        account_id: "100200".to_string(),
        site_id: "300".to_string(),
        environment: GatewayEnvironment::Sandbox,
        secret_ref: format!("tenants/{}", tenant_id),
        active,
        created_at: now,
        updated_at: now,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_key(None).await
}

/// Wires the router against in-memory storage and a mock gateway that
/// serves both environments.
pub async fn spawn_app_with_key(api_key: Option<&str>) -> TestApp {
    build_app(api_key, Arc::new(default_secrets()), Duration::from_secs(5)).await
}

/// Same wiring with a caller-supplied secret store and form deadline.
pub async fn spawn_app_with_secrets(secrets: Arc<dyn SecretStore>, form_deadline: Duration) -> TestApp {
    build_app(None, secrets, form_deadline).await
}

fn default_secrets() -> StaticSecretStore {
    StaticSecretStore::new()
        .with_secret("tenants/m1", SHARED_SECRET)
        .with_secret("tenants/m2", "s3cret-m2")
        .with_secret("tenants/m-closed", "s3cret-closed")
}

async fn build_app(
    api_key: Option<&str>,
    secrets: Arc<dyn SecretStore>,
    form_deadline: Duration,
) -> TestApp {
    let gateway = mockito::Server::new_async().await;

    let tenants = InMemoryTenantRepository::new();
    tenants.upsert(tenant(TENANT, true)).await;
    tenants.upsert(tenant(OTHER_TENANT, true)).await;
    tenants.upsert(tenant(INACTIVE_TENANT, false)).await;
    tenants.upsert(tenant(UNSEALED_TENANT, true)).await;

    let ledger = InMemoryTransactionRepository::new();
    let payment_methods = InMemoryPaymentMethodRepository::new();
    let (capture, _worker) = PaymentMethodCapture::spawn(Arc::new(payment_methods.clone()), 3);

    let state = AppState::new(Dependencies {
        tenants: Arc::new(tenants),
        secrets,
        ledger: Arc::new(ledger.clone()),
        payment_methods: Arc::new(payment_methods.clone()),
        gateway: GatewayClient::new("https://unused.example.com".to_string(), gateway.url()),
        capture,
        public_base_url: Url::parse(PUBLIC_BASE_URL).unwrap(),
        form_deadline,
        api_key: api_key.map(str::to_string),
    });

    TestApp {
        app: create_app(state.clone()),
        state,
        ledger,
        payment_methods,
        gateway,
    }
}

impl TestApp {
    /// Token exchange that always hands out `token`.
    pub async fn mock_token(&mut self, token: &str) -> mockito::Mock {
        self.token_mock(token).create_async().await
    }

    /// Same as `mock_token`, asserting the number of exchanges.
    pub async fn mock_token_hits(&mut self, token: &str, hits: usize) -> mockito::Mock {
        self.token_mock(token).expect(hits).create_async().await
    }

    fn token_mock(&mut self, token: &str) -> mockito::Mock {
        self.gateway
            .mock("POST", "/v1/tokens")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "token": token }).to_string())
    }

    /// Server-to-server step that only answers when the parent token matches.
    pub async fn mock_chain_step(
        &mut self,
        kind: &str,
        input_token: &str,
        result_code: &str,
        result_token: &str,
    ) -> mockito::Mock {
        self.gateway
            .mock("POST", "/v1/transactions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "transaction_type": kind,
                "token": input_token,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "result_code": result_code,
                    "auth_code": "A1B2C3",
                    "card_type": "VISA",
                    "token": result_token,
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_json(request).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send_json(request).await
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
        };
        (status, json)
    }

    /// Posts a gateway callback the way a browser would, fields in the body.
    pub async fn post_callback(&self, fields: &[(&str, &str)]) -> (StatusCode, String) {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        send(self.app.clone(), request).await
    }

    /// Generates a redirect form for `transaction_id` and returns its JSON.
    pub async fn open_form(&mut self, transaction_id: &str, kind: &str, amount: &str) -> serde_json::Value {
        let _token = self.mock_token(&format!("redirect-{}", transaction_id)).await;
        let mut request = serde_json::json!({
            "transaction_id": transaction_id,
            "tenant_id": TENANT,
            "amount": amount,
            "currency": "USD",
            "kind": kind,
            "return_url": RETURN_URL,
        });
        if kind == "STORAGE" {
            request["customer_id"] = serde_json::json!("c-1");
        }

        let (status, form) = self.post_json("/forms", request).await;
        assert_eq!(status, StatusCode::OK, "form generation failed: {}", form);
        form
    }

    /// Delivers an approving callback for a form opened with `open_form`.
    pub async fn approve(&self, form: &serde_json::Value, result_token: &str) -> String {
        let callback_url = Url::parse(form["callback_url"].as_str().unwrap()).unwrap();
        let mut fields: Vec<(String, String)> = callback_url.query_pairs().into_owned().collect();
        fields.extend([
            ("result_code".to_string(), "00".to_string()),
            ("auth_code".to_string(), "OK1234".to_string()),
            ("card_type".to_string(), "VISA".to_string()),
            ("token".to_string(), result_token.to_string()),
            ("masked_account".to_string(), "************1111".to_string()),
        ]);
        let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let (status, page) = self.post_callback(&borrowed).await;
        assert_eq!(status, StatusCode::OK);
        page
    }
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Callback fields echoed back from a generated form's callback URL.
pub fn callback_fields(form: &serde_json::Value) -> Vec<(String, String)> {
    let callback_url = Url::parse(form["callback_url"].as_str().unwrap()).unwrap();
    callback_url.query_pairs().into_owned().collect()
}

/// Polls until the capture worker has drained, failing after a second.
pub async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
