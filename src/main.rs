use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use sqlx::migrate::Migrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paybridge_core::adapters::{
    PostgresPaymentMethodRepository, PostgresTenantRepository, PostgresTransactionRepository,
};
use paybridge_core::cli::{self, Cli, Commands, DbCommands};
use paybridge_core::config::{Config, LogFormat};
use paybridge_core::gateway::GatewayClient;
use paybridge_core::secrets::VaultSecretStore;
use paybridge_core::services::{spawn_capture_sweeper, PaymentMethodCapture};
use paybridge_core::{create_app, db, AppState, Dependencies};

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_RESET_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let secrets = Arc::new(VaultSecretStore::from_env().await?);
    tracing::info!("Secret store client initialized");

    let gateway = GatewayClient::with_circuit_breaker(
        config.gateway_production_url.clone(),
        config.gateway_sandbox_url.clone(),
        config.gateway_timeout(),
        CIRCUIT_FAILURE_THRESHOLD,
        CIRCUIT_RESET_SECS,
    );
    tracing::info!(
        production = %config.gateway_production_url,
        sandbox = %config.gateway_sandbox_url,
        "Gateway client initialized"
    );

    let payment_methods = Arc::new(PostgresPaymentMethodRepository::new(pool.clone()));
    let (capture, _capture_worker) =
        PaymentMethodCapture::spawn(payment_methods.clone(), config.capture_max_attempts);

    let ledger = Arc::new(PostgresTransactionRepository::new(pool.clone()));
    let _capture_sweeper = spawn_capture_sweeper(
        ledger.clone(),
        payment_methods.clone(),
        capture.clone(),
        config.capture_sweep_interval(),
    );

    let state = AppState::new(Dependencies {
        tenants: Arc::new(PostgresTenantRepository::new(pool.clone())),
        secrets,
        ledger,
        payment_methods,
        gateway,
        capture,
        public_base_url: config.public_base_url()?,
        form_deadline: config.form_deadline(),
        api_key: config.api_key.clone(),
    });
    if state.api_key.is_none() {
        tracing::warn!("API_KEY is not set; caller endpoints are unauthenticated");
    }

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
