use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::transaction::PaymentMethodKind;

/// Reusable token captured from an approved tokenizing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPaymentMethod {
    pub id: Uuid,
    pub tenant_id: String,
    pub customer_id: String,
    pub source_transaction_id: String,
    pub token: String,
    pub kind: PaymentMethodKind,
    pub card_brand: Option<String>,
    pub masked_account: Option<String>,
    // Activation and verification belong to the account-maintenance jobs.
    pub active: bool,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Display-only projection. The token never leaves the service.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethodSummary {
    pub id: Uuid,
    pub customer_id: String,
    pub kind: PaymentMethodKind,
    pub card_brand: Option<String>,
    pub masked_account: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredPaymentMethod> for PaymentMethodSummary {
    fn from(method: &StoredPaymentMethod) -> Self {
        Self {
            id: method.id,
            customer_id: method.customer_id.clone(),
            kind: method.kind,
            card_brand: method.card_brand.clone(),
            masked_account: method.masked_account.clone(),
            verified: method.verified,
            created_at: method.created_at,
        }
    }
}
