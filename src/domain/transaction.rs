//! Transaction domain entity.
//! Framework-agnostic representation of one gateway-facing attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::reference::{self, GatewayReference};

/// Outcome code the gateway uses for an approved request.
pub const APPROVED_OUTCOME: &str = "00";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0} transactions require a parent transaction")]
    ParentRequired(TransactionKind),
    #[error("{0} transactions cannot have a parent transaction")]
    ParentNotAllowed(TransactionKind),
    #[error("amount must not be negative")]
    NegativeAmount,
    #[error("unknown transaction kind: {0}")]
    UnknownKind(String),
    #[error("unknown payment method kind: {0}")]
    UnknownPaymentMethod(String),
    #[error("transaction {parent_id} already has a {kind} in progress or approved")]
    ParentSettled {
        parent_id: String,
        kind: TransactionKind,
    },
    #[error("refunds of transaction {0} would exceed its amount")]
    RefundExceedsParent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Sale,
    Auth,
    Capture,
    Refund,
    Void,
    Storage,
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Sale => "SALE",
            TransactionKind::Auth => "AUTH",
            TransactionKind::Capture => "CAPTURE",
            TransactionKind::Refund => "REFUND",
            TransactionKind::Void => "VOID",
            TransactionKind::Storage => "STORAGE",
            TransactionKind::Debit => "DEBIT",
        }
    }

    /// Follow-up steps that act on an earlier transaction's token.
    pub fn requires_parent(&self) -> bool {
        matches!(
            self,
            TransactionKind::Capture | TransactionKind::Refund | TransactionKind::Void
        )
    }

    /// Kinds a browser-redirect form may be generated for.
    pub fn is_redirect_kind(&self) -> bool {
        matches!(
            self,
            TransactionKind::Sale | TransactionKind::Auth | TransactionKind::Storage
        )
    }

    /// Whether this kind's returned token becomes a stored payment method.
    pub fn is_tokenizing(&self) -> bool {
        matches!(self, TransactionKind::Storage)
    }

    /// Parent kinds a follow-up step may act on.
    pub fn allowed_parents(&self) -> &'static [TransactionKind] {
        match self {
            TransactionKind::Capture => &[TransactionKind::Auth],
            TransactionKind::Refund => &[TransactionKind::Sale, TransactionKind::Capture],
            TransactionKind::Void => &[
                TransactionKind::Sale,
                TransactionKind::Auth,
                TransactionKind::Capture,
            ],
            _ => &[],
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALE" => Ok(TransactionKind::Sale),
            "AUTH" => Ok(TransactionKind::Auth),
            "CAPTURE" => Ok(TransactionKind::Capture),
            "REFUND" => Ok(TransactionKind::Refund),
            "VOID" => Ok(TransactionKind::Void),
            "STORAGE" => Ok(TransactionKind::Storage),
            "DEBIT" => Ok(TransactionKind::Debit),
            _ => Err(DomainError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodKind {
    #[default]
    Card,
    Ach,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::Card => "card",
            PaymentMethodKind::Ach => "ach",
        }
    }
}

impl FromStr for PaymentMethodKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(PaymentMethodKind::Card),
            "ach" => Ok(PaymentMethodKind::Ach),
            _ => Err(DomainError::UnknownPaymentMethod(s.to_string())),
        }
    }
}

/// Status derived from gateway outcome data. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Failed,
    Approved,
    Declined,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn derive_status(outcome_code: Option<&str>, contact_attempted: bool) -> TransactionStatus {
    match (outcome_code, contact_attempted) {
        (_, false) => TransactionStatus::Pending,
        (None, true) => TransactionStatus::Failed,
        (Some(code), true) if code == APPROVED_OUTCOME => TransactionStatus::Approved,
        (Some(_), true) => TransactionStatus::Declined,
    }
}

/// Checks the kind/parent pairing before anything touches storage or the gateway.
pub fn check_parent(kind: TransactionKind, parent_id: Option<&str>) -> Result<(), DomainError> {
    match (kind.requires_parent(), parent_id) {
        (true, None) => Err(DomainError::ParentRequired(kind)),
        (false, Some(_)) => Err(DomainError::ParentNotAllowed(kind)),
        _ => Ok(()),
    }
}

/// Fields the caller controls when a pending row is opened.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: String,
    pub parent_id: Option<String>,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub kind: TransactionKind,
    pub payment_method: PaymentMethodKind,
    pub payment_method_id: Option<Uuid>,
    pub input_token: Option<String>,
    pub return_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// What the gateway told us when a pending row is finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayOutcome {
    pub outcome_code: Option<String>,
    pub auth_code: Option<String>,
    pub card_brand: Option<String>,
    pub result_token: Option<String>,
    pub message: Option<String>,
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub parent_id: Option<String>,
    /// Id of the first transaction in this row's chain.
    pub group_id: String,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub kind: TransactionKind,
    pub payment_method: PaymentMethodKind,
    pub payment_method_id: Option<Uuid>,
    pub gateway_reference: GatewayReference,
    /// Token presented to the gateway for this step.
    pub input_token: Option<String>,
    /// Token the gateway handed back for this step.
    pub result_token: Option<String>,
    pub outcome_code: Option<String>,
    pub auth_code: Option<String>,
    pub card_brand: Option<String>,
    pub gateway_message: Option<String>,
    pub return_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub gateway_contacted_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Opens a pending row. Invariants are enforced here, before any I/O.
    pub fn new_pending(input: NewTransaction) -> Result<Self, DomainError> {
        check_parent(input.kind, input.parent_id.as_deref())?;
        if input.amount_minor < 0 {
            return Err(DomainError::NegativeAmount);
        }

        let now = Utc::now();
        Ok(Self {
            gateway_reference: reference::derive(&input.id),
            group_id: input.parent_id.clone().unwrap_or_else(|| input.id.clone()),
            id: input.id,
            parent_id: input.parent_id,
            tenant_id: input.tenant_id,
            customer_id: input.customer_id,
            amount_minor: input.amount_minor,
            currency: input.currency,
            kind: input.kind,
            payment_method: input.payment_method,
            payment_method_id: input.payment_method_id,
            input_token: input.input_token,
            result_token: None,
            outcome_code: None,
            auth_code: None,
            card_brand: None,
            gateway_message: None,
            return_url: input.return_url,
            metadata: input.metadata,
            gateway_contacted_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> TransactionStatus {
        derive_status(self.outcome_code.as_deref(), self.gateway_contacted_at.is_some())
    }

    pub fn is_pending(&self) -> bool {
        self.deleted_at.is_none() && self.status() == TransactionStatus::Pending
    }

    /// Chain root id, fixed when the row is opened.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Places a follow-up step in its parent's chain.
    pub fn join_chain(mut self, parent: &Transaction) -> Self {
        self.group_id = parent.group_id.clone();
        self
    }

    /// Applies a gateway outcome. Only meaningful on a pending row; storage
    /// adapters call this inside their conditional update.
    pub fn apply_outcome(&mut self, outcome: &GatewayOutcome, contacted_at: DateTime<Utc>) {
        self.outcome_code = outcome.outcome_code.clone();
        self.auth_code = outcome.auth_code.clone();
        self.card_brand = outcome.card_brand.clone();
        self.result_token = outcome.result_token.clone();
        self.gateway_message = outcome.message.clone();
        self.gateway_contacted_at = Some(contacted_at);
        self.updated_at = contacted_at;
    }
}

/// Checks a follow-up step against the steps already recorded under the
/// same parent. Declined and failed siblings do not count.
///
/// A parent takes at most one CAPTURE or VOID; refunds may be split but
/// their total stays within the parent's amount, and a voided parent takes
/// no refunds.
pub fn check_siblings(
    step: &Transaction,
    parent: &Transaction,
    siblings: &[Transaction],
) -> Result<(), DomainError> {
    let live: Vec<&Transaction> = siblings
        .iter()
        .filter(|s| s.id != step.id && s.deleted_at.is_none())
        .filter(|s| {
            matches!(
                s.status(),
                TransactionStatus::Pending | TransactionStatus::Approved
            )
        })
        .collect();

    let settled = |kinds: &[TransactionKind]| live.iter().find(|s| kinds.contains(&s.kind));

    match step.kind {
        TransactionKind::Capture | TransactionKind::Void => {
            let blocking: &[TransactionKind] = if step.kind == TransactionKind::Void {
                &[TransactionKind::Capture, TransactionKind::Void, TransactionKind::Refund]
            } else {
                &[TransactionKind::Capture, TransactionKind::Void]
            };
            if let Some(existing) = settled(blocking) {
                return Err(DomainError::ParentSettled {
                    parent_id: parent.id.clone(),
                    kind: existing.kind,
                });
            }
        }
        TransactionKind::Refund => {
            if let Some(void) = settled(&[TransactionKind::Void]) {
                return Err(DomainError::ParentSettled {
                    parent_id: parent.id.clone(),
                    kind: void.kind,
                });
            }
            let refunded: i64 = live
                .iter()
                .filter(|s| s.kind == TransactionKind::Refund)
                .map(|s| s.amount_minor)
                .sum();
            if refunded.saturating_add(step.amount_minor) > parent.amount_minor {
                return Err(DomainError::RefundExceedsParent(parent.id.clone()));
            }
        }
        _ => {}
    }

    Ok(())
}
