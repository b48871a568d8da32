use std::collections::HashMap;
use std::env;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::domain::SharedSecret;

const DEFAULT_SECRET_KEY: &str = "shared_secret";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Source of tenant shared secrets. Implementations must not cache: every
/// call reflects the store's current value so rotation applies immediately.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, secret_ref: &str) -> Result<SharedSecret, SecretError>;
}

/// Splits `path#key` into its parts, defaulting the key.
fn split_ref(secret_ref: &str) -> (&str, &str) {
    match secret_ref.split_once('#') {
        Some((path, key)) if !key.is_empty() => (path, key),
        Some((path, _)) => (path, DEFAULT_SECRET_KEY),
        None => (secret_ref, DEFAULT_SECRET_KEY),
    }
}

pub struct VaultSecretStore {
    client: VaultClient,
    kv_mount: String,
}

impl VaultSecretStore {
    pub async fn from_env() -> anyhow::Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        tracing::info!("Vault secret store initialized at {}", vault_addr);
        Ok(Self { client, kv_mount })
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn fetch(&self, secret_ref: &str) -> Result<SharedSecret, SecretError> {
        let (path, key) = split_ref(secret_ref);
        let secret: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, path)
            .await
            .map_err(|e| match e {
                vaultrs::error::ClientError::APIError { code: 404, .. } => {
                    SecretError::NotFound(path.to_string())
                }
                other => SecretError::Unavailable(other.to_string()),
            })?;

        secret
            .get(key)
            .cloned()
            .map(SharedSecret::new)
            .ok_or_else(|| SecretError::NotFound(format!("{}#{}", path, key)))
    }
}

/// Fixed secrets keyed by reference. Used by tests and local runs without Vault.
#[derive(Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_ref: &str, value: &str) -> Self {
        self.secrets.insert(secret_ref.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn fetch(&self, secret_ref: &str) -> Result<SharedSecret, SecretError> {
        self.secrets
            .get(secret_ref)
            .cloned()
            .map(SharedSecret::new)
            .ok_or_else(|| SecretError::NotFound(secret_ref.to_string()))
    }
}
