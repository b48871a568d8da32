//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    check_siblings, GatewayOutcome, GatewayReference, PaymentMethodKind, Transaction,
    TransactionKind, APPROVED_OUTCOME,
};
use crate::ports::{InsertOutcome, RepositoryError, RepositoryResult, TransactionRepository};

const TRANSACTION_COLUMNS: &str = r#"
    id, parent_id, group_id, tenant_id, customer_id, amount_minor, currency, kind,
    payment_method, payment_method_id, gateway_reference, input_token, result_token,
    outcome_code, auth_code, card_brand, gateway_message, return_url, metadata,
    gateway_contacted_at, deleted_at, created_at, updated_at
"#;

const REFERENCE_CONSTRAINT: &str = "transactions_gateway_reference_key";
const RESULT_TOKEN_CONSTRAINT: &str = "transactions_tenant_result_token_key";

/// Postgres-backed transaction ledger.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Name of the unique constraint a statement tripped, if any.
pub(crate) fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            db.constraint().map(str::to_string)
        }
        _ => None,
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert_pending(&self, tx: &Transaction) -> RepositoryResult<InsertOutcome> {
        match insert_row(&self.pool, tx).await? {
            Some(row) => Ok(InsertOutcome::Created(row.into_domain()?)),
            None => {
                let existing = self
                    .get_by_id(&tx.id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(tx.id.clone()))?;
                Ok(InsertOutcome::Existing(existing))
            }
        }
    }

    async fn insert_chain_step(&self, step: &Transaction) -> RepositoryResult<InsertOutcome> {
        let parent_id = step
            .parent_id
            .as_deref()
            .ok_or_else(|| RepositoryError::NotFound(format!("parent of {}", step.id)))?;

        let mut db_tx = self.pool.begin().await?;

        // Follow-ups of one parent queue up behind this row lock.
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let parent = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(parent_id)
            .fetch_optional(&mut *db_tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(parent_id.to_string()))?
            .into_domain()?;

        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        if let Some(existing) = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&step.id)
            .fetch_optional(&mut *db_tx)
            .await?
        {
            return Ok(InsertOutcome::Existing(existing.into_domain()?));
        }

        let sql = format!(
            "SELECT {} FROM transactions WHERE parent_id = $1",
            TRANSACTION_COLUMNS
        );
        let siblings = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(parent_id)
            .fetch_all(&mut *db_tx)
            .await?
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;
        check_siblings(step, &parent, &siblings).map_err(RepositoryError::Chain)?;

        let inserted = insert_row(&mut *db_tx, step).await?;
        db_tx.commit().await?;

        match inserted {
            Some(row) => Ok(InsertOutcome::Created(row.into_domain()?)),
            None => {
                let existing = self
                    .get_by_id(&step.id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(step.id.clone()))?;
                Ok(InsertOutcome::Existing(existing))
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn get_by_reference(
        &self,
        reference: GatewayReference,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE gateway_reference = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(reference.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn finalize_pending(
        &self,
        reference: GatewayReference,
        outcome: &GatewayOutcome,
    ) -> RepositoryResult<Option<Transaction>> {
        // The WHERE clause is re-evaluated after a concurrent writer commits,
        // so only the first UPDATE sees a pending row.
        let sql = format!(
            r#"
            UPDATE transactions
            SET outcome_code = $2,
                auth_code = $3,
                card_brand = $4,
                result_token = $5,
                gateway_message = $6,
                gateway_contacted_at = NOW(),
                updated_at = NOW()
            WHERE gateway_reference = $1
              AND gateway_contacted_at IS NULL
              AND deleted_at IS NULL
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(reference.as_i64())
            .bind(&outcome.outcome_code)
            .bind(&outcome.auth_code)
            .bind(&outcome.card_brand)
            .bind(&outcome.result_token)
            .bind(&outcome.message)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match violated_constraint(&e).as_deref() {
                Some(RESULT_TOKEN_CONSTRAINT) => {
                    RepositoryError::DuplicateToken(format!("reference {}", reference))
                }
                _ => RepositoryError::from(e),
            })?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn uncaptured_tokenizations(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions t
            WHERE t.kind = $1
              AND t.outcome_code = $2
              AND t.result_token IS NOT NULL
              AND t.deleted_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM stored_payment_methods m
                  WHERE m.source_transaction_id = t.id
              )
            ORDER BY t.updated_at
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        );

        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(TransactionKind::Storage.as_str())
            .bind(APPROVED_OUTCOME)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect()
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Inserts unless the id is taken; `None` means another row already holds it.
async fn insert_row<'e, E>(executor: E, tx: &Transaction) -> RepositoryResult<Option<TransactionRow>>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let sql = format!(
        r#"
        INSERT INTO transactions (
            id, parent_id, group_id, tenant_id, customer_id, amount_minor, currency, kind,
            payment_method, payment_method_id, gateway_reference, input_token,
            return_url, metadata, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO NOTHING
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    );

    sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(&tx.id)
        .bind(&tx.parent_id)
        .bind(&tx.group_id)
        .bind(&tx.tenant_id)
        .bind(&tx.customer_id)
        .bind(tx.amount_minor)
        .bind(&tx.currency)
        .bind(tx.kind.as_str())
        .bind(tx.payment_method.as_str())
        .bind(tx.payment_method_id)
        .bind(tx.gateway_reference.as_i64())
        .bind(&tx.input_token)
        .bind(&tx.return_url)
        .bind(&tx.metadata)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_optional(executor)
        .await
        .map_err(|e| match violated_constraint(&e).as_deref() {
            Some(REFERENCE_CONSTRAINT) => RepositoryError::ReferenceCollision(tx.gateway_reference),
            _ => RepositoryError::from(e),
        })
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    parent_id: Option<String>,
    group_id: String,
    tenant_id: String,
    customer_id: Option<String>,
    amount_minor: i64,
    currency: String,
    kind: String,
    payment_method: String,
    payment_method_id: Option<Uuid>,
    gateway_reference: i64,
    input_token: Option<String>,
    result_token: Option<String>,
    outcome_code: Option<String>,
    auth_code: Option<String>,
    card_brand: Option<String>,
    gateway_message: Option<String>,
    return_url: Option<String>,
    metadata: Option<serde_json::Value>,
    gateway_contacted_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let corrupt = |what: String| RepositoryError::Corrupt(format!("transaction {}: {}", self.id, what));

        let kind = self
            .kind
            .parse::<TransactionKind>()
            .map_err(|e| corrupt(format!("{}", e)))?;
        let payment_method = self
            .payment_method
            .parse::<PaymentMethodKind>()
            .map_err(|e| corrupt(format!("{}", e)))?;
        let gateway_reference = GatewayReference::from_stored(self.gateway_reference)
            .ok_or_else(|| corrupt(format!("reference {} out of range", self.gateway_reference)))?;

        Ok(Transaction {
            id: self.id,
            parent_id: self.parent_id,
            group_id: self.group_id,
            tenant_id: self.tenant_id,
            customer_id: self.customer_id,
            amount_minor: self.amount_minor,
            currency: self.currency.trim_end().to_string(),
            kind,
            payment_method,
            payment_method_id: self.payment_method_id,
            gateway_reference,
            input_token: self.input_token,
            result_token: self.result_token,
            outcome_code: self.outcome_code,
            auth_code: self.auth_code,
            card_brand: self.card_brand,
            gateway_message: self.gateway_message,
            return_url: self.return_url,
            metadata: self.metadata,
            gateway_contacted_at: self.gateway_contacted_at,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
