//! Form generation use case.
//!
//! Builds the payload a caller renders as an auto-submitting browser form
//! that posts to the gateway. The ledger row is opened only once the
//! gateway has issued a redirect token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::ServiceError;
use crate::domain::{
    GatewayReference, NewTransaction, PaymentMethodKind, ResolvedCredentials, Transaction,
    TransactionKind,
};
use crate::gateway::{fields, GatewayClient, RedirectToken, TokenRequest};
use crate::ports::{InsertOutcome, PaymentMethodRepository, TransactionRepository};
use crate::services::credentials::CredentialResolver;
use crate::validation::{
    parse_amount_minor_units, required_field, sanitize_string, validate_currency,
    validate_identifier, validate_return_url, ValidationError,
};

/// Caller request as received. Every field is optional here so a missing
/// field is reported as a validation error rather than a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormRequest {
    pub transaction_id: Option<String>,
    pub tenant_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub kind: Option<String>,
    pub return_url: Option<String>,
    pub customer_id: Option<String>,
    pub payment_method: Option<String>,
    pub payment_method_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Everything the caller needs to post the browser to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectForm {
    pub post_url: String,
    pub account_id: String,
    pub site_id: String,
    pub token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub reference: GatewayReference,
    pub callback_url: String,
    pub return_url: Option<String>,
    pub tenant_name: String,
    pub transaction_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub kind: TransactionKind,
}

#[derive(Debug)]
struct ValidatedForm {
    pending: Transaction,
    return_url: Url,
}

#[derive(Clone)]
pub struct FormGenerationService {
    resolver: CredentialResolver,
    gateway: GatewayClient,
    ledger: Arc<dyn TransactionRepository>,
    payment_methods: Arc<dyn PaymentMethodRepository>,
    callback_endpoint: Url,
    deadline: Duration,
}

impl FormGenerationService {
    pub fn new(
        resolver: CredentialResolver,
        gateway: GatewayClient,
        ledger: Arc<dyn TransactionRepository>,
        payment_methods: Arc<dyn PaymentMethodRepository>,
        public_base_url: Url,
        deadline: Duration,
    ) -> Self {
        Self {
            resolver,
            gateway,
            ledger,
            payment_methods,
            callback_endpoint: callback_endpoint(public_base_url),
            deadline,
        }
    }

    pub async fn generate(&self, request: FormRequest) -> Result<RedirectForm, ServiceError> {
        let ValidatedForm { pending, return_url } = validate(request)?;

        // Bounded: credential lookup, stored-token lookup and the exchange.
        let (credentials, stored_token, redirect) = tokio::time::timeout(
            self.deadline,
            self.obtain_token(&pending, &return_url),
        )
        .await
        .map_err(|_| ServiceError::DeadlineExceeded(self.deadline))??;

        let mut pending = pending;
        pending.input_token = stored_token;

        let row = match self.ledger.insert_pending(&pending).await? {
            InsertOutcome::Created(row) => {
                info!(
                    transaction_id = %row.id,
                    tenant_id = %row.tenant_id,
                    reference = %row.gateway_reference,
                    kind = %row.kind,
                    "Pending transaction opened"
                );
                row
            }
            InsertOutcome::Existing(existing) => {
                ensure_equivalent(&existing, &pending)?;
                if !existing.is_pending() {
                    return Err(ServiceError::AlreadyProcessed(existing.id));
                }
                info!(
                    transaction_id = %existing.id,
                    reference = %existing.gateway_reference,
                    "Re-issuing form for existing pending transaction"
                );
                existing
            }
        };

        let callback_url = self.callback_url(&row, &return_url);
        Ok(RedirectForm {
            post_url: self.gateway.post_url(credentials.tenant.environment),
            account_id: credentials.tenant.account_id,
            site_id: credentials.tenant.site_id,
            token: redirect.token,
            token_expires_at: redirect.expires_at,
            reference: row.gateway_reference,
            callback_url: callback_url.to_string(),
            return_url: row.return_url.clone(),
            tenant_name: credentials.tenant.display_name,
            transaction_id: row.id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            kind: row.kind,
        })
    }

    async fn obtain_token(
        &self,
        pending: &Transaction,
        return_url: &Url,
    ) -> Result<(ResolvedCredentials, Option<String>, RedirectToken), ServiceError> {
        // Unknown or inactive tenants stop here, before any gateway contact.
        let credentials = self.resolver.resolve(&pending.tenant_id).await?;

        let stored_token = match pending.payment_method_id {
            Some(id) => Some(self.stored_token(pending, id).await?),
            None => None,
        };

        let callback_url = self.callback_url(pending, return_url);
        let request = TokenRequest {
            kind: pending.kind,
            amount_minor: pending.amount_minor,
            currency: pending.currency.clone(),
            reference: pending.gateway_reference,
            callback_url: callback_url.to_string(),
            stored_token: stored_token.clone(),
        };

        let redirect = self.gateway.request_token(&credentials, &request).await.map_err(|e| {
            warn!(
                transaction_id = %pending.id,
                tenant_id = %pending.tenant_id,
                error = %e,
                "Token exchange failed; no ledger row written"
            );
            e
        })?;

        Ok((credentials, stored_token, redirect))
    }

    async fn stored_token(&self, pending: &Transaction, id: Uuid) -> Result<String, ServiceError> {
        let method = self
            .payment_methods
            .get(&pending.tenant_id, id)
            .await?
            .filter(|m| m.active)
            .filter(|m| match pending.customer_id.as_deref() {
                Some(customer_id) => m.customer_id == customer_id,
                None => true,
            })
            .ok_or_else(|| ServiceError::NotFound(format!("payment method {}", id)))?;
        Ok(method.token)
    }

    /// Callback URL carrying the parameters the gateway echoes back.
    fn callback_url(&self, tx: &Transaction, return_url: &Url) -> Url {
        let mut url = self.callback_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair(fields::TXN_ID, &tx.id)
                .append_pair(fields::TENANT_ID, &tx.tenant_id)
                .append_pair(fields::KIND, tx.kind.as_str())
                .append_pair(fields::REFERENCE, &tx.gateway_reference.to_string());
            let return_url = tx.return_url.as_deref().unwrap_or(return_url.as_str());
            query.append_pair(fields::RETURN_URL, return_url);
            if tx.kind.is_tokenizing() {
                if let Some(customer_id) = tx.customer_id.as_deref() {
                    query.append_pair(fields::CUSTOMER_ID, customer_id);
                }
            }
        }
        url
    }
}

/// `{public_base}/callback`, keeping any path prefix of the base.
fn callback_endpoint(mut public_base_url: Url) -> Url {
    public_base_url.set_query(None);
    public_base_url.set_fragment(None);
    if let Ok(mut segments) = public_base_url.path_segments_mut() {
        segments.pop_if_empty().push("callback");
    }
    public_base_url
}

fn validate(request: FormRequest) -> Result<ValidatedForm, ServiceError> {
    let transaction_id = required_field("transaction_id", request.transaction_id)?;
    validate_identifier("transaction_id", &transaction_id)?;

    let tenant_id = required_field("tenant_id", request.tenant_id)?;
    validate_identifier("tenant_id", &tenant_id)?;

    let amount_minor = parse_amount_minor_units(&required_field("amount", request.amount)?)?;
    let currency = validate_currency(&required_field("currency", request.currency)?)?;

    let kind = required_field("kind", request.kind)?
        .parse::<TransactionKind>()
        .map_err(|_| ValidationError::new("kind", "must be one of: SALE, AUTH, STORAGE"))?;
    if !kind.is_redirect_kind() {
        return Err(ValidationError::new("kind", "must be one of: SALE, AUTH, STORAGE").into());
    }

    let return_url = validate_return_url(&required_field("return_url", request.return_url)?)?;

    let customer_id = request
        .customer_id
        .map(|c| sanitize_string(&c))
        .filter(|c| !c.is_empty());
    if let Some(customer_id) = customer_id.as_deref() {
        validate_identifier("customer_id", customer_id)?;
    }
    if kind.is_tokenizing() && customer_id.is_none() {
        return Err(ValidationError::new("customer_id", "is required for STORAGE").into());
    }

    let payment_method = match request.payment_method.as_deref().map(str::trim) {
        None | Some("") => PaymentMethodKind::default(),
        Some(raw) => raw
            .parse::<PaymentMethodKind>()
            .map_err(|_| ValidationError::new("payment_method", "must be one of: card, ach"))?,
    };

    let payment_method_id = match request.payment_method_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| ValidationError::new("payment_method_id", "must be a UUID"))?,
        ),
    };
    if payment_method_id.is_some() && kind.is_tokenizing() {
        return Err(ValidationError::new(
            "payment_method_id",
            "cannot be used with STORAGE",
        )
        .into());
    }

    // Kind/parent invariants are checked here, before any I/O.
    let pending = Transaction::new_pending(NewTransaction {
        id: transaction_id,
        parent_id: None,
        tenant_id,
        customer_id,
        amount_minor,
        currency,
        kind,
        payment_method,
        payment_method_id,
        input_token: None,
        return_url: Some(return_url.to_string()),
        metadata: request.metadata,
    })?;

    Ok(ValidatedForm { pending, return_url })
}

/// A reused identifier must describe the same transaction. Everything the
/// token exchange and the callback URL were built from has to match, or the
/// re-issued form would point the browser somewhere the row does not.
fn ensure_equivalent(existing: &Transaction, requested: &Transaction) -> Result<(), ServiceError> {
    let same = existing.tenant_id == requested.tenant_id
        && existing.amount_minor == requested.amount_minor
        && existing.currency == requested.currency
        && existing.kind == requested.kind
        && existing.parent_id == requested.parent_id
        && existing.return_url == requested.return_url
        && existing.customer_id == requested.customer_id
        && existing.payment_method == requested.payment_method
        && existing.payment_method_id == requested.payment_method_id;

    if same {
        Ok(())
    } else {
        // The id may belong to another tenant; the message must not say so.
        Err(ServiceError::Conflict(format!(
            "transaction id {} is already in use",
            requested.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FormRequest {
        FormRequest {
            transaction_id: Some("t-100".to_string()),
            tenant_id: Some("m1".to_string()),
            amount: Some("25.00".to_string()),
            currency: Some("USD".to_string()),
            kind: Some("SALE".to_string()),
            return_url: Some("https://shop.example.com/done".to_string()),
            ..FormRequest::default()
        }
    }

    #[test]
    fn test_validate_builds_pending_row() {
        let form = validate(request()).unwrap();
        assert_eq!(form.pending.amount_minor, 2500);
        assert_eq!(form.pending.kind, TransactionKind::Sale);
        assert!(form.pending.is_pending());
        assert_eq!(form.pending.gateway_reference, crate::domain::derive("t-100"));
    }

    #[test]
    fn test_validate_rejects_missing_and_follow_up_kinds() {
        let mut missing = request();
        missing.amount = None;
        assert!(matches!(validate(missing), Err(ServiceError::Validation(_))));

        let mut capture = request();
        capture.kind = Some("CAPTURE".to_string());
        assert!(matches!(validate(capture), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_storage_requires_customer() {
        let mut storage = request();
        storage.kind = Some("STORAGE".to_string());
        assert!(validate(storage.clone()).is_err());

        storage.customer_id = Some("c-1".to_string());
        assert!(validate(storage).is_ok());
    }

    #[test]
    fn test_callback_endpoint_keeps_prefix() {
        let base = Url::parse("https://pay.example.com/api/").unwrap();
        assert_eq!(
            callback_endpoint(base).as_str(),
            "https://pay.example.com/api/callback"
        );

        let base = Url::parse("https://pay.example.com").unwrap();
        assert_eq!(callback_endpoint(base).as_str(), "https://pay.example.com/callback");
    }

    #[test]
    fn test_equivalence_check() {
        let original = validate(request()).unwrap().pending;

        let mut other_amount = request();
        other_amount.amount = Some("30.00".to_string());
        let other_amount = validate(other_amount).unwrap().pending;
        assert!(ensure_equivalent(&original, &other_amount).is_err());

        let mut other_tenant = request();
        other_tenant.tenant_id = Some("m2".to_string());
        let other_tenant = validate(other_tenant).unwrap().pending;
        assert!(ensure_equivalent(&original, &other_tenant).is_err());

        assert!(ensure_equivalent(&original, &original.clone()).is_ok());
    }

    #[test]
    fn test_equivalence_covers_callback_inputs() {
        let mut storage = request();
        storage.kind = Some("STORAGE".to_string());
        storage.customer_id = Some("c-1".to_string());
        let original = validate(storage.clone()).unwrap().pending;

        let mut other_return = storage.clone();
        other_return.return_url = Some("https://evil.example.net/done".to_string());
        let other_return = validate(other_return).unwrap().pending;
        assert!(ensure_equivalent(&original, &other_return).is_err());

        let mut other_customer = storage.clone();
        other_customer.customer_id = Some("c-2".to_string());
        let other_customer = validate(other_customer).unwrap().pending;
        assert!(ensure_equivalent(&original, &other_customer).is_err());

        let mut other_method = storage;
        other_method.payment_method = Some("ach".to_string());
        let other_method = validate(other_method).unwrap().pending;
        assert!(ensure_equivalent(&original, &other_method).is_err());
    }
}
