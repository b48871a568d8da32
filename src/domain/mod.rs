pub mod payment_method;
pub mod reference;
pub mod tenant;
pub mod transaction;

pub use payment_method::{PaymentMethodSummary, StoredPaymentMethod};
pub use reference::{derive, GatewayReference};
pub use tenant::{GatewayEnvironment, ResolvedCredentials, SharedSecret, TenantCredentials};
pub use transaction::{
    check_parent, check_siblings, derive_status, DomainError, GatewayOutcome, NewTransaction,
    PaymentMethodKind, Transaction, TransactionKind, TransactionStatus, APPROVED_OUTCOME,
};
