use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use super::SIGNATURE_HEADER;
use crate::domain::{
    GatewayEnvironment, GatewayOutcome, GatewayReference, ResolvedCredentials, TransactionKind,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("gateway rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("gateway call aborted: {0}")]
    Aborted(String),
}

/// Parameters for the out-of-band redirect-token exchange.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub kind: TransactionKind,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: GatewayReference,
    pub callback_url: String,
    /// Stored payment-method token to charge instead of collecting new details.
    pub stored_token: Option<String>,
}

/// Short-lived, single-use artifact that authorizes one browser redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedirectToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Server-to-server follow-up on an earlier transaction.
#[derive(Debug, Clone)]
pub struct ChainStepRequest {
    pub kind: TransactionKind,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: GatewayReference,
    /// The parent step's returned token.
    pub input_token: String,
}

#[derive(Debug, Serialize)]
struct TokenExchangeBody<'a> {
    account_id: &'a str,
    site_id: &'a str,
    transaction_type: &'a str,
    amount: i64,
    currency: &'a str,
    reference: u64,
    callback_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stored_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChainStepBody<'a> {
    account_id: &'a str,
    site_id: &'a str,
    transaction_type: &'a str,
    amount: i64,
    currency: &'a str,
    reference: u64,
    token: &'a str,
}

/// Gateway answer to a server-to-server request.
#[derive(Debug, Clone, Deserialize)]
struct ChainStepResponse {
    #[serde(default)]
    result_code: Option<String>,
    #[serde(default)]
    auth_code: Option<String>,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    result_message: Option<String>,
}

impl From<ChainStepResponse> for GatewayOutcome {
    fn from(res: ChainStepResponse) -> Self {
        GatewayOutcome {
            outcome_code: res.result_code,
            auth_code: res.auth_code,
            card_brand: res.card_type,
            result_token: res.token,
            message: res.result_message,
        }
    }
}

/// Hex HMAC-SHA256 of `body` keyed by the tenant's shared secret.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// HTTP client for the settlement gateway.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    timeout: Duration,
    production_url: String,
    sandbox_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewayClient {
    pub fn new(production_url: String, sandbox_url: String) -> Self {
        Self::with_circuit_breaker(production_url, sandbox_url, DEFAULT_TIMEOUT, 3, 60)
    }

    /// Creates a client with an explicit per-call timeout and breaker settings.
    pub fn with_circuit_breaker(
        production_url: String,
        sandbox_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        // Every request also carries the timeout, so the fallback client
        // still bounds each call.
        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build gateway HTTP client; using defaults");
                Client::new()
            }
        };

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        GatewayClient {
            client,
            timeout,
            production_url,
            sandbox_url,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    pub fn base_url(&self, environment: GatewayEnvironment) -> &str {
        let url = match environment {
            GatewayEnvironment::Production => &self.production_url,
            GatewayEnvironment::Sandbox => &self.sandbox_url,
        };
        url.trim_end_matches('/')
    }

    /// Where the browser form is posted.
    pub fn post_url(&self, environment: GatewayEnvironment) -> String {
        format!("{}/v1/pay", self.base_url(environment))
    }

    pub async fn request_token(
        &self,
        credentials: &ResolvedCredentials,
        request: &TokenRequest,
    ) -> Result<RedirectToken, GatewayError> {
        let tenant = &credentials.tenant;
        let body = serde_json::to_vec(&TokenExchangeBody {
            account_id: &tenant.account_id,
            site_id: &tenant.site_id,
            transaction_type: request.kind.as_str(),
            amount: request.amount_minor,
            currency: &request.currency,
            reference: request.reference.value(),
            callback_url: &request.callback_url,
            stored_token: request.stored_token.as_deref(),
        })
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let url = format!("{}/v1/tokens", self.base_url(tenant.environment));
        let token: RedirectToken = self
            .post_signed(url, credentials.secret.expose(), body)
            .await?;

        if token.token.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "token exchange returned an empty token".to_string(),
            ));
        }
        Ok(token)
    }

    pub async fn submit_chain_step(
        &self,
        credentials: &ResolvedCredentials,
        request: &ChainStepRequest,
    ) -> Result<GatewayOutcome, GatewayError> {
        let tenant = &credentials.tenant;
        let body = serde_json::to_vec(&ChainStepBody {
            account_id: &tenant.account_id,
            site_id: &tenant.site_id,
            transaction_type: request.kind.as_str(),
            amount: request.amount_minor,
            currency: &request.currency,
            reference: request.reference.value(),
            token: &request.input_token,
        })
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let url = format!("{}/v1/transactions", self.base_url(tenant.environment));
        let response: ChainStepResponse = self
            .post_signed(url, credentials.secret.expose(), body)
            .await?;
        Ok(response.into())
    }

    /// Sends a signed JSON body.
    ///
    /// The request runs on its own task: if the caller is dropped mid-flight
    /// the exchange still completes, so a live token is never left half-issued.
    async fn post_signed<R>(&self, url: String, secret: &str, body: Vec<u8>) -> Result<R, GatewayError>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let signature = sign_payload(secret, &body);
        let client = self.client.clone();
        let timeout = self.timeout;
        let circuit_breaker = self.circuit_breaker.clone();

        let handle = tokio::spawn(async move {
            circuit_breaker
                .call(async move {
                    let response = client
                        .post(&url)
                        .timeout(timeout)
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .header(SIGNATURE_HEADER, signature)
                        .body(body)
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(GatewayError::Rejected {
                            status: status.as_u16(),
                            body,
                        });
                    }

                    response
                        .json::<R>()
                        .await
                        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
                })
                .await
        });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(FailsafeError::Rejected)) => Err(GatewayError::CircuitBreakerOpen(
                "gateway circuit breaker is open".to_string(),
            )),
            Ok(Err(FailsafeError::Inner(e))) => Err(e),
            Err(join_error) => Err(GatewayError::Aborted(join_error.to_string())),
        }
    }
}
