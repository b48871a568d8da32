//! Tenant credential set.
//!
//! Administratively provisioned and read-only here. The shared secret itself
//! never lives on this struct, only the reference used to fetch it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayEnvironment {
    Production,
    #[default]
    Sandbox,
}

impl GatewayEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEnvironment::Production => "production",
            GatewayEnvironment::Sandbox => "sandbox",
        }
    }
}

impl FromStr for GatewayEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "live" => Ok(GatewayEnvironment::Production),
            "sandbox" | "test" => Ok(GatewayEnvironment::Sandbox),
            other => Err(format!("unknown gateway environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub tenant_id: String,
    pub display_name: String,
    /// Gateway account (merchant) routing number.
    pub account_id: String,
    /// Gateway site (terminal) routing number.
    pub site_id: String,
    pub environment: GatewayEnvironment,
    /// Secret-store path of the shared secret, optionally `path#key`.
    pub secret_ref: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared secret fetched for a single request. Redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(****)")
    }
}

/// Credentials resolved for one request: routing numbers plus a freshly
/// fetched secret.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub tenant: TenantCredentials,
    pub secret: SharedSecret,
}
