//! Callback processing use case.
//!
//! The gateway sends the browser back to us with a form POST that merges its
//! own result fields with the query parameters of the callback URL we gave it.
//! Nothing in that bag is signed. A row is finalized only if the reference
//! matches the transaction id, the row is still pending, and the conditional
//! update in the ledger wins.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::{
    derive, GatewayOutcome, GatewayReference, Transaction, TransactionKind, TransactionStatus,
};
use crate::gateway::fields;
use crate::ports::{RepositoryError, TransactionRepository};
use crate::services::payment_method_capture::{CaptureRequest, PaymentMethodCapture};
use crate::utils::sanitize::sanitize_form;
use crate::validation::{format_minor_units, validate_return_url};

pub const ALREADY_PROCESSED_MESSAGE: &str = "This payment has already been processed.";
pub const UNPROCESSABLE_MESSAGE: &str =
    "We could not process this payment response. Please contact the merchant.";

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("callback is missing field {0}")]
    MissingField(&'static str),

    #[error("callback field {0} is malformed")]
    InvalidField(&'static str),

    #[error("reference {reference} does not belong to transaction {transaction_id}")]
    ReferenceMismatch {
        transaction_id: String,
        reference: GatewayReference,
    },

    #[error("no transaction carries reference {0}")]
    UnknownReference(GatewayReference),

    #[error("callback fields disagree with the ledger row for reference {0}")]
    LedgerMismatch(GatewayReference),

    #[error("transaction {0} is not pending")]
    AlreadyProcessed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CallbackError {
    /// Anything other than a storage failure may be a forged or replayed post.
    fn is_security_relevant(&self) -> bool {
        !matches!(self, CallbackError::Repository(_))
    }
}

/// Typed view of a callback. Built once at the boundary; the raw field bag
/// is dropped afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackPayload {
    pub transaction_id: String,
    pub tenant_id: String,
    pub kind: Option<TransactionKind>,
    pub reference: GatewayReference,
    pub customer_id: Option<String>,
    pub return_url: Option<String>,
    pub masked_account: Option<String>,
    pub outcome: GatewayOutcome,
}

fn take(bag: &mut HashMap<String, String>, key: &str) -> Option<String> {
    bag
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CallbackPayload {
    pub fn from_fields(mut bag: HashMap<String, String>) -> Result<Self, CallbackError> {
        let transaction_id =
            take(&mut bag, fields::TXN_ID).ok_or(CallbackError::MissingField(fields::TXN_ID))?;
        let tenant_id = take(&mut bag, fields::TENANT_ID)
            .ok_or(CallbackError::MissingField(fields::TENANT_ID))?;

        let kind = take(&mut bag, fields::KIND)
            .map(|raw| raw.parse::<TransactionKind>())
            .transpose()
            .map_err(|_| CallbackError::InvalidField(fields::KIND))?;

        let derived = derive(&transaction_id);
        let reference = match take(&mut bag, fields::REFERENCE) {
            Some(raw) => GatewayReference::parse(&raw)
                .ok_or(CallbackError::InvalidField(fields::REFERENCE))?,
            None => derived,
        };
        if reference != derived {
            return Err(CallbackError::ReferenceMismatch {
                transaction_id,
                reference,
            });
        }

        Ok(Self {
            transaction_id,
            tenant_id,
            kind,
            reference,
            customer_id: take(&mut bag, fields::CUSTOMER_ID),
            return_url: take(&mut bag, fields::RETURN_URL),
            masked_account: take(&mut bag, fields::MASKED_ACCOUNT),
            outcome: GatewayOutcome {
                outcome_code: take(&mut bag, fields::RESULT_CODE),
                auth_code: take(&mut bag, fields::AUTH_CODE),
                card_brand: take(&mut bag, fields::CARD_TYPE),
                result_token: take(&mut bag, fields::TOKEN),
                message: take(&mut bag, fields::MESSAGE),
            },
        })
    }
}

/// What the browser should be shown.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Send the browser back to the caller's return address.
    Redirect {
        transaction: Transaction,
        location: Url,
    },
    /// No usable return address: show a receipt.
    Receipt(Transaction),
    /// Generic refusal that reveals nothing about ledger state.
    Rejected(&'static str),
}

#[derive(Clone)]
pub struct CallbackProcessor {
    ledger: Arc<dyn TransactionRepository>,
    capture: PaymentMethodCapture,
}

impl CallbackProcessor {
    pub fn new(ledger: Arc<dyn TransactionRepository>, capture: PaymentMethodCapture) -> Self {
        Self { ledger, capture }
    }

    /// Handles one delivery. Never fails: every problem becomes a page the
    /// browser can render.
    pub async fn process(&self, fields: HashMap<String, String>) -> CallbackOutcome {
        let logged_fields = sanitize_form(&fields);

        let payload = match CallbackPayload::from_fields(fields) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "security",
                    error = %e,
                    fields = %logged_fields,
                    "Rejected malformed gateway callback"
                );
                return CallbackOutcome::Rejected(UNPROCESSABLE_MESSAGE);
            }
        };

        match self.finalize(&payload).await {
            Ok(transaction) => {
                info!(
                    transaction_id = %transaction.id,
                    tenant_id = %transaction.tenant_id,
                    reference = %transaction.gateway_reference,
                    status = %transaction.status(),
                    "Transaction finalized from gateway callback"
                );
                self.capture_payment_method(&transaction, &payload);
                respond(transaction, payload.return_url.as_deref())
            }
            Err(e) if e.is_security_relevant() => {
                warn!(
                    target: "security",
                    error = %e,
                    reference = %payload.reference,
                    fields = %logged_fields,
                    "Possible replayed or forged gateway callback"
                );
                match e {
                    CallbackError::AlreadyProcessed(_) | CallbackError::UnknownReference(_) => {
                        CallbackOutcome::Rejected(ALREADY_PROCESSED_MESSAGE)
                    }
                    _ => CallbackOutcome::Rejected(UNPROCESSABLE_MESSAGE),
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    transaction_id = %payload.transaction_id,
                    reference = %payload.reference,
                    "Failed to record gateway callback"
                );
                CallbackOutcome::Rejected(UNPROCESSABLE_MESSAGE)
            }
        }
    }

    /// Locates the pending row and performs the single pending-to-terminal
    /// transition.
    pub async fn finalize(&self, payload: &CallbackPayload) -> Result<Transaction, CallbackError> {
        let row = self
            .ledger
            .get_by_reference(payload.reference)
            .await?
            .ok_or(CallbackError::UnknownReference(payload.reference))?;

        // Follow-up steps are finalized by the gateway's own response, never
        // by a browser post.
        let kind_matches = payload.kind.map_or(true, |kind| kind == row.kind);
        if row.id != payload.transaction_id
            || row.tenant_id != payload.tenant_id
            || !kind_matches
            || !row.kind.is_redirect_kind()
        {
            return Err(CallbackError::LedgerMismatch(payload.reference));
        }
        if !row.is_pending() {
            return Err(CallbackError::AlreadyProcessed(row.id));
        }

        // Losing the race to a concurrent delivery is the same as a replay.
        self.ledger
            .finalize_pending(payload.reference, &payload.outcome)
            .await?
            .ok_or(CallbackError::AlreadyProcessed(row.id))
    }

    fn capture_payment_method(&self, transaction: &Transaction, payload: &CallbackPayload) {
        if !transaction.kind.is_tokenizing() || transaction.status() != TransactionStatus::Approved {
            return;
        }

        let Some(token) = transaction.result_token.clone() else {
            error!(
                transaction_id = %transaction.id,
                "Approved tokenizing transaction returned no token"
            );
            return;
        };
        let Some(customer_id) = transaction
            .customer_id
            .clone()
            .or_else(|| payload.customer_id.clone())
        else {
            error!(
                transaction_id = %transaction.id,
                "Approved tokenizing transaction has no customer"
            );
            return;
        };

        self.capture.notify(CaptureRequest {
            tenant_id: transaction.tenant_id.clone(),
            customer_id,
            source_transaction_id: transaction.id.clone(),
            token,
            kind: transaction.payment_method,
            card_brand: transaction.card_brand.clone(),
            masked_account: payload.masked_account.clone(),
        });
    }
}

fn respond(transaction: Transaction, payload_return_url: Option<&str>) -> CallbackOutcome {
    match redirect_location(&transaction, payload_return_url) {
        Some(location) => CallbackOutcome::Redirect {
            transaction,
            location,
        },
        None => CallbackOutcome::Receipt(transaction),
    }
}

/// The row's own return address wins; the echoed copy only fills a gap.
pub fn redirect_location(transaction: &Transaction, fallback: Option<&str>) -> Option<Url> {
    let raw = transaction.return_url.as_deref().or(fallback)?;
    let mut url = validate_return_url(raw).ok()?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("transaction_id", &transaction.id)
            .append_pair("group_id", transaction.group_id())
            .append_pair("status", transaction.status().as_str())
            .append_pair("amount", &format_minor_units(transaction.amount_minor))
            .append_pair("currency", &transaction.currency);
        if let Some(card_brand) = transaction.card_brand.as_deref() {
            query.append_pair("card_brand", card_brand);
        }
        if let Some(auth_code) = transaction.auth_code.as_deref() {
            query.append_pair("auth_code", auth_code);
        }
    }

    Some(url)
}
