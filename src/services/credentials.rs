use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::ResolvedCredentials;
use crate::ports::{RepositoryError, TenantRepository};
use crate::secrets::{SecretError, SecretStore};

const SECRET_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("tenant {0} not found")]
    UnknownTenant(String),

    #[error("tenant {0} is inactive")]
    InactiveTenant(String),

    #[error("secret fetch failed for tenant {tenant_id}: {source}")]
    Secret {
        tenant_id: String,
        #[source]
        source: SecretError,
    },

    #[error("secret fetch timed out for tenant {0}")]
    SecretTimeout(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Loads a tenant's routing numbers and fetches its shared secret.
///
/// Nothing is cached between calls; a rotated secret or a deactivated tenant
/// takes effect on the very next request.
#[derive(Clone)]
pub struct CredentialResolver {
    tenants: Arc<dyn TenantRepository>,
    secrets: Arc<dyn SecretStore>,
    secret_timeout: Duration,
}

impl CredentialResolver {
    pub fn new(tenants: Arc<dyn TenantRepository>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            tenants,
            secrets,
            secret_timeout: SECRET_FETCH_TIMEOUT,
        }
    }

    pub fn with_secret_timeout(mut self, timeout: Duration) -> Self {
        self.secret_timeout = timeout;
        self
    }

    pub async fn resolve(&self, tenant_id: &str) -> Result<ResolvedCredentials, CredentialError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await?
            .ok_or_else(|| CredentialError::UnknownTenant(tenant_id.to_string()))?;

        if !tenant.active {
            return Err(CredentialError::InactiveTenant(tenant_id.to_string()));
        }

        let secret = tokio::time::timeout(self.secret_timeout, self.secrets.fetch(&tenant.secret_ref))
            .await
            .map_err(|_| CredentialError::SecretTimeout(tenant_id.to_string()))?
            .map_err(|source| CredentialError::Secret {
                tenant_id: tenant_id.to_string(),
                source,
            })?;

        Ok(ResolvedCredentials { tenant, secret })
    }
}
