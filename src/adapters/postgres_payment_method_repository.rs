//! Postgres implementation of PaymentMethodRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{PaymentMethodKind, StoredPaymentMethod};
use crate::ports::{CaptureOutcome, PaymentMethodRepository, RepositoryError, RepositoryResult};

const PAYMENT_METHOD_COLUMNS: &str = r#"
    id, tenant_id, customer_id, source_transaction_id, token, kind,
    card_brand, masked_account, active, verified, created_at
"#;

#[derive(Clone)]
pub struct PostgresPaymentMethodRepository {
    pool: PgPool,
}

impl PostgresPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PostgresPaymentMethodRepository {
    async fn insert(&self, method: &StoredPaymentMethod) -> RepositoryResult<CaptureOutcome> {
        let sql = format!(
            r#"
            INSERT INTO stored_payment_methods (
                id, tenant_id, customer_id, source_transaction_id, token, kind,
                card_brand, masked_account, active, verified, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_transaction_id) DO NOTHING
            RETURNING {}
            "#,
            PAYMENT_METHOD_COLUMNS
        );

        let inserted = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(method.id)
            .bind(&method.tenant_id)
            .bind(&method.customer_id)
            .bind(&method.source_transaction_id)
            .bind(&method.token)
            .bind(method.kind.as_str())
            .bind(&method.card_brand)
            .bind(&method.masked_account)
            .bind(method.active)
            .bind(method.verified)
            .bind(method.created_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok(CaptureOutcome::Created(row.into_domain()?)),
            None => {
                let existing = self
                    .get_by_source_transaction(&method.source_transaction_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(method.source_transaction_id.clone()))?;
                Ok(CaptureOutcome::AlreadyCaptured(existing))
            }
        }
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> RepositoryResult<Option<StoredPaymentMethod>> {
        let sql = format!(
            "SELECT {} FROM stored_payment_methods WHERE id = $1 AND tenant_id = $2",
            PAYMENT_METHOD_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PaymentMethodRow::into_domain).transpose()
    }

    async fn get_by_source_transaction(
        &self,
        source_transaction_id: &str,
    ) -> RepositoryResult<Option<StoredPaymentMethod>> {
        let sql = format!(
            "SELECT {} FROM stored_payment_methods WHERE source_transaction_id = $1",
            PAYMENT_METHOD_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(source_transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PaymentMethodRow::into_domain).transpose()
    }

    async fn list_for_customer(
        &self,
        tenant_id: &str,
        customer_id: &str,
    ) -> RepositoryResult<Vec<StoredPaymentMethod>> {
        let sql = format!(
            r#"
            SELECT {} FROM stored_payment_methods
            WHERE tenant_id = $1 AND customer_id = $2 AND active
            ORDER BY created_at DESC
            "#,
            PAYMENT_METHOD_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentMethodRow>(&sql)
            .bind(tenant_id)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PaymentMethodRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentMethodRow {
    id: Uuid,
    tenant_id: String,
    customer_id: String,
    source_transaction_id: String,
    token: String,
    kind: String,
    card_brand: Option<String>,
    masked_account: Option<String>,
    active: bool,
    verified: bool,
    created_at: DateTime<Utc>,
}

impl PaymentMethodRow {
    fn into_domain(self) -> RepositoryResult<StoredPaymentMethod> {
        let kind = self
            .kind
            .parse::<PaymentMethodKind>()
            .map_err(|e| RepositoryError::Corrupt(format!("payment method {}: {}", self.id, e)))?;

        Ok(StoredPaymentMethod {
            id: self.id,
            tenant_id: self.tenant_id,
            customer_id: self.customer_id,
            source_transaction_id: self.source_transaction_id,
            token: self.token,
            kind,
            card_brand: self.card_brand,
            masked_account: self.masked_account,
            active: self.active,
            verified: self.verified,
            created_at: self.created_at,
        })
    }
}
