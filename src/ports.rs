//! Storage and secret-store boundaries.
//!
//! The use cases only talk to these traits. Postgres and in-memory adapters
//! live under `adapters/`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    DomainError, GatewayOutcome, GatewayReference, StoredPaymentMethod, TenantCredentials,
    Transaction,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("gateway reference {0} is already bound to another transaction")]
    ReferenceCollision(GatewayReference),

    #[error("gateway token already recorded for tenant {0}")]
    DuplicateToken(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Chain(DomainError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result of opening a pending row keyed by the caller's transaction id.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Transaction),
    /// A row with this identifier already existed; nothing was written.
    Existing(Transaction),
}

impl InsertOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            InsertOutcome::Created(tx) | InsertOutcome::Existing(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            InsertOutcome::Created(tx) | InsertOutcome::Existing(tx) => tx,
        }
    }
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts `tx` unless its identifier is already taken.
    async fn insert_pending(&self, tx: &Transaction) -> RepositoryResult<InsertOutcome>;

    /// Inserts a follow-up step. The parent is locked while the step is
    /// checked against its siblings, so concurrent steps on one parent are
    /// serialized. An existing row with the step's id is returned unchanged.
    async fn insert_chain_step(&self, step: &Transaction) -> RepositoryResult<InsertOutcome>;

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<Transaction>>;

    async fn get_by_reference(
        &self,
        reference: GatewayReference,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Writes the gateway outcome only while the row is still pending.
    ///
    /// Returns `None` when no pending row carries `reference`; exactly one
    /// concurrent caller observes `Some`.
    async fn finalize_pending(
        &self,
        reference: GatewayReference,
        outcome: &GatewayOutcome,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Approved tokenizing rows that carry a returned token and may still
    /// lack a stored payment method. Callers re-check before capturing.
    async fn uncaptured_tokenizations(&self, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn get(&self, tenant_id: &str) -> RepositoryResult<Option<TenantCredentials>>;
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Created(StoredPaymentMethod),
    /// The source transaction was already captured.
    AlreadyCaptured(StoredPaymentMethod),
}

#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    /// Idempotent on `method.source_transaction_id`.
    async fn insert(&self, method: &StoredPaymentMethod) -> RepositoryResult<CaptureOutcome>;

    async fn get(&self, tenant_id: &str, id: Uuid) -> RepositoryResult<Option<StoredPaymentMethod>>;

    async fn get_by_source_transaction(
        &self,
        source_transaction_id: &str,
    ) -> RepositoryResult<Option<StoredPaymentMethod>>;

    async fn list_for_customer(
        &self,
        tenant_id: &str,
        customer_id: &str,
    ) -> RepositoryResult<Vec<StoredPaymentMethod>>;
}
