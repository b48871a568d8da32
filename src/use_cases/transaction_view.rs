use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    GatewayReference, PaymentMethodKind, Transaction, TransactionKind, TransactionStatus,
};
use crate::utils::sanitize::mask_token;
use crate::validation::format_minor_units;

/// Read model of a ledger row. Status is derived; tokens are masked.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub parent_id: Option<String>,
    pub group_id: String,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    pub amount_minor: i64,
    pub amount: String,
    pub currency: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethodKind,
    pub payment_method_id: Option<Uuid>,
    pub reference: GatewayReference,
    pub input_token: Option<String>,
    pub result_token: Option<String>,
    pub outcome_code: Option<String>,
    pub auth_code: Option<String>,
    pub card_brand: Option<String>,
    pub gateway_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub gateway_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            parent_id: tx.parent_id.clone(),
            group_id: tx.group_id().to_string(),
            tenant_id: tx.tenant_id.clone(),
            customer_id: tx.customer_id.clone(),
            amount_minor: tx.amount_minor,
            amount: format_minor_units(tx.amount_minor),
            currency: tx.currency.clone(),
            kind: tx.kind,
            status: tx.status(),
            payment_method: tx.payment_method,
            payment_method_id: tx.payment_method_id,
            reference: tx.gateway_reference,
            input_token: tx.input_token.as_deref().map(mask_token),
            result_token: tx.result_token.as_deref().map(mask_token),
            outcome_code: tx.outcome_code.clone(),
            auth_code: tx.auth_code.clone(),
            card_brand: tx.card_brand.clone(),
            gateway_message: tx.gateway_message.clone(),
            metadata: tx.metadata.clone(),
            gateway_contacted_at: tx.gateway_contacted_at,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}
