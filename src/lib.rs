pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod utils;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::gateway::GatewayClient;
use crate::ports::{PaymentMethodRepository, TenantRepository, TransactionRepository};
use crate::secrets::SecretStore;
use crate::services::credentials::CredentialResolver;
use crate::services::payment_method_capture::PaymentMethodCapture;
use crate::use_cases::{CallbackProcessor, ChainStepService, FormGenerationService};

/// Everything the HTTP surface needs, wired from concrete adapters.
pub struct Dependencies {
    pub tenants: Arc<dyn TenantRepository>,
    pub secrets: Arc<dyn SecretStore>,
    pub ledger: Arc<dyn TransactionRepository>,
    pub payment_methods: Arc<dyn PaymentMethodRepository>,
    pub gateway: GatewayClient,
    pub capture: PaymentMethodCapture,
    pub public_base_url: Url,
    pub form_deadline: Duration,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub forms: FormGenerationService,
    pub callbacks: CallbackProcessor,
    pub chain: ChainStepService,
    pub ledger: Arc<dyn TransactionRepository>,
    pub payment_methods: Arc<dyn PaymentMethodRepository>,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(deps: Dependencies) -> Self {
        let resolver = CredentialResolver::new(deps.tenants, deps.secrets);

        Self {
            forms: FormGenerationService::new(
                resolver.clone(),
                deps.gateway.clone(),
                deps.ledger.clone(),
                deps.payment_methods.clone(),
                deps.public_base_url,
                deps.form_deadline,
            ),
            callbacks: CallbackProcessor::new(deps.ledger.clone(), deps.capture),
            chain: ChainStepService::new(resolver, deps.gateway, deps.ledger.clone()),
            ledger: deps.ledger,
            payment_methods: deps.payment_methods,
            api_key: deps.api_key.map(Arc::from),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // The gateway callback is reached by browsers and never carries the key.
    let caller_routes = Router::new()
        .route("/forms", post(handlers::forms::create_form))
        .route("/chain-steps", post(handlers::chain::submit_chain_step))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/tenants/:tenant_id/customers/:customer_id/payment-methods",
            get(handlers::payment_methods::list_payment_methods),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/callback", post(handlers::callback::gateway_callback))
        .merge(caller_routes)
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
