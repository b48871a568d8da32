//! Postgres implementation of TenantRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{GatewayEnvironment, TenantCredentials};
use crate::ports::{RepositoryError, RepositoryResult, TenantRepository};

#[derive(Clone)]
pub struct PostgresTenantRepository {
    pool: PgPool,
}

impl PostgresTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn get(&self, tenant_id: &str) -> RepositoryResult<Option<TenantCredentials>> {
        // Read straight through on every request so deactivation and
        // secret-reference changes are never served stale.
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT tenant_id, display_name, account_id, site_id, environment,
                   secret_ref, active, created_at, updated_at
            FROM tenants
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TenantRow::into_domain).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    tenant_id: String,
    display_name: String,
    account_id: String,
    site_id: String,
    environment: String,
    secret_ref: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TenantRow {
    fn into_domain(self) -> RepositoryResult<TenantCredentials> {
        let environment = self
            .environment
            .parse::<GatewayEnvironment>()
            .map_err(|e| RepositoryError::Corrupt(format!("tenant {}: {}", self.tenant_id, e)))?;

        Ok(TenantCredentials {
            tenant_id: self.tenant_id,
            display_name: self.display_name,
            account_id: self.account_id,
            site_id: self.site_id,
            environment,
            secret_ref: self.secret_ref,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
