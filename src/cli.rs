use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "paybridge-core")]
#[command(about = "PayBridge Core - payment gateway redirect and callback service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    use sqlx::migrate::Migrator;
    use std::path::Path;

    let pool = crate::db::create_pool(config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;

    tracing::info!("Running database migrations...");
    migrator.run(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Public Base URL: {}", config.public_base_url);
    println!("  Gateway (production): {}", config.gateway_production_url);
    println!("  Gateway (sandbox): {}", config.gateway_sandbox_url);
    println!("  Gateway Timeout: {}s", config.gateway_timeout_secs);
    println!("  Form Deadline: {}s", config.form_deadline_secs);
    println!("  Capture Max Attempts: {}", config.capture_max_attempts);
    println!("  Capture Sweep Interval: {}s", config.capture_sweep_interval_secs);
    println!(
        "  API Key: {}",
        if config.api_key.is_some() { "set" } else { "not set" }
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::validate_environment(config, &pool).await?;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
