use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::env;
use std::time::Duration;

const VAULT_VARS: &[&str] = &["VAULT_ADDR", "VAULT_ROLE_ID", "VAULT_SECRET_ID"];

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Gateway Reachability:  {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    for (label, url) in [
        ("production", &config.gateway_production_url),
        ("sandbox", &config.gateway_sandbox_url),
    ] {
        if let Err(e) = validate_gateway(url).await {
            report.gateway = false;
            report.errors.push(format!("Gateway ({}): {}", label, e));
        }
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.form_deadline_secs == 0 || config.gateway_timeout_secs == 0 {
        anyhow::bail!("GATEWAY_TIMEOUT_SECS and FORM_DEADLINE_SECS must be greater than 0");
    }
    if config.capture_max_attempts == 0 {
        anyhow::bail!("CAPTURE_MAX_ATTEMPTS must be greater than 0");
    }
    if config.capture_sweep_interval_secs == 0 {
        anyhow::bail!("CAPTURE_SWEEP_INTERVAL_SECS must be greater than 0");
    }

    config.public_base_url()?;
    url::Url::parse(&config.gateway_production_url)
        .context("GATEWAY_PRODUCTION_URL is not a valid URL")?;
    url::Url::parse(&config.gateway_sandbox_url)
        .context("GATEWAY_SANDBOX_URL is not a valid URL")?;

    let missing: Vec<&str> = VAULT_VARS
        .iter()
        .copied()
        .filter(|name| env::var(name).map(|v| v.is_empty()).unwrap_or(true))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("missing secret store settings: {}", missing.join(", "));
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    // Check if migrations are up to date
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Any HTTP answer below 500 counts as reachable; the base URL itself is not
/// an API endpoint.
async fn validate_gateway(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .context("Failed to connect to gateway")?;

    if response.status().is_server_error() {
        anyhow::bail!("Gateway returned status: {}", response.status());
    }

    Ok(())
}
