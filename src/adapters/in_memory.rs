//! In-memory implementations of the storage ports.
//!
//! Each store keeps its rows behind a single `tokio::sync::RwLock`, so the
//! read-check-write in `finalize_pending` happens under one write guard and is
//! as atomic as the conditional `UPDATE` in the Postgres adapter.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    check_siblings, GatewayOutcome, GatewayReference, StoredPaymentMethod, TenantCredentials,
    Transaction, TransactionStatus,
};
use crate::ports::{
    CaptureOutcome, InsertOutcome, PaymentMethodRepository, RepositoryError, RepositoryResult,
    TenantRepository, TransactionRepository,
};

#[derive(Default)]
struct Ledger {
    rows: HashMap<String, Transaction>,
    by_reference: HashMap<GatewayReference, String>,
}

impl Ledger {
    fn insert(&mut self, tx: &Transaction) -> RepositoryResult<InsertOutcome> {
        if let Some(existing) = self.rows.get(&tx.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if self.by_reference.contains_key(&tx.gateway_reference) {
            return Err(RepositoryError::ReferenceCollision(tx.gateway_reference));
        }

        self.by_reference.insert(tx.gateway_reference, tx.id.clone());
        self.rows.insert(tx.id.clone(), tx.clone());
        Ok(InsertOutcome::Created(tx.clone()))
    }
}

/// Thread-safe in-memory transaction ledger.
#[derive(Default, Clone)]
pub struct InMemoryTransactionRepository {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.ledger.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert_pending(&self, tx: &Transaction) -> RepositoryResult<InsertOutcome> {
        let mut ledger = self.ledger.write().await;
        ledger.insert(tx)
    }

    async fn insert_chain_step(&self, step: &Transaction) -> RepositoryResult<InsertOutcome> {
        let mut ledger = self.ledger.write().await;

        if let Some(existing) = ledger.rows.get(&step.id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        let parent_id = step
            .parent_id
            .as_deref()
            .ok_or_else(|| RepositoryError::NotFound(format!("parent of {}", step.id)))?;
        let parent = ledger
            .rows
            .get(parent_id)
            .ok_or_else(|| RepositoryError::NotFound(parent_id.to_string()))?;
        let siblings: Vec<Transaction> = ledger
            .rows
            .values()
            .filter(|r| r.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        check_siblings(step, parent, &siblings).map_err(RepositoryError::Chain)?;

        ledger.insert(step)
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<Transaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.rows.get(id).cloned())
    }

    async fn get_by_reference(
        &self,
        reference: GatewayReference,
    ) -> RepositoryResult<Option<Transaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_reference
            .get(&reference)
            .and_then(|id| ledger.rows.get(id))
            .cloned())
    }

    async fn finalize_pending(
        &self,
        reference: GatewayReference,
        outcome: &GatewayOutcome,
    ) -> RepositoryResult<Option<Transaction>> {
        let mut guard = self.ledger.write().await;
        let ledger = &mut *guard;

        let Some(id) = ledger.by_reference.get(&reference).cloned() else {
            return Ok(None);
        };
        let Some(row) = ledger.rows.get(&id) else {
            return Ok(None);
        };
        if !row.is_pending() {
            return Ok(None);
        }

        if let Some(token) = outcome.result_token.as_deref() {
            let tenant_id = row.tenant_id.clone();
            let taken = ledger
                .rows
                .values()
                .any(|r| r.tenant_id == tenant_id && r.result_token.as_deref() == Some(token));
            if taken {
                return Err(RepositoryError::DuplicateToken(tenant_id));
            }
        }

        let Some(row) = ledger.rows.get_mut(&id) else {
            return Ok(None);
        };
        row.apply_outcome(outcome, Utc::now());
        Ok(Some(row.clone()))
    }

    async fn uncaptured_tokenizations(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let ledger = self.ledger.read().await;
        let mut found: Vec<Transaction> = ledger
            .rows
            .values()
            .filter(|r| r.kind.is_tokenizing() && r.deleted_at.is_none())
            .filter(|r| r.status() == TransactionStatus::Approved && r.result_token.is_some())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

/// In-memory tenant directory.
#[derive(Default, Clone)]
pub struct InMemoryTenantRepository {
    tenants: Arc<RwLock<HashMap<String, TenantCredentials>>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Administrative write; the request path never calls this.
    pub async fn upsert(&self, tenant: TenantCredentials) {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.tenant_id.clone(), tenant);
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn get(&self, tenant_id: &str) -> RepositoryResult<Option<TenantCredentials>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(tenant_id).cloned())
    }
}

/// In-memory stored payment methods, keyed by id.
#[derive(Default, Clone)]
pub struct InMemoryPaymentMethodRepository {
    methods: Arc<RwLock<HashMap<Uuid, StoredPaymentMethod>>>,
}

impl InMemoryPaymentMethodRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.methods.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PaymentMethodRepository for InMemoryPaymentMethodRepository {
    async fn insert(&self, method: &StoredPaymentMethod) -> RepositoryResult<CaptureOutcome> {
        let mut methods = self.methods.write().await;

        if let Some(existing) = methods
            .values()
            .find(|m| m.source_transaction_id == method.source_transaction_id)
        {
            return Ok(CaptureOutcome::AlreadyCaptured(existing.clone()));
        }

        methods.insert(method.id, method.clone());
        Ok(CaptureOutcome::Created(method.clone()))
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> RepositoryResult<Option<StoredPaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods
            .get(&id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_by_source_transaction(
        &self,
        source_transaction_id: &str,
    ) -> RepositoryResult<Option<StoredPaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods
            .values()
            .find(|m| m.source_transaction_id == source_transaction_id)
            .cloned())
    }

    async fn list_for_customer(
        &self,
        tenant_id: &str,
        customer_id: &str,
    ) -> RepositoryResult<Vec<StoredPaymentMethod>> {
        let methods = self.methods.read().await;
        let mut found: Vec<StoredPaymentMethod> = methods
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.customer_id == customer_id && m.active)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
