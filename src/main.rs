//! # dirsync Main Entry Point
//!
//! CLI for the directory synchronization service: run the background
//! scheduler, apply migrations, or trigger one-off syncs and connection
//! tests for a single tenant.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dirsync::config::ConfigLoader;
use dirsync::crypto::CryptoKey;
use dirsync::directory::LdapDirectoryClient;
use dirsync::scheduler::SyncScheduler;
use dirsync::sync::SyncService;
use dirsync::{db, logging};

#[derive(Parser)]
#[command(name = "dirsync", about = "Multi-tenant directory synchronization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background sync scheduler until interrupted
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Reconcile a single tenant now and print the stats
    Sync {
        #[arg(long)]
        tenant: Uuid,
    },
    /// Test the directory connection for a tenant
    TestConnection {
        #[arg(long)]
        tenant: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    logging::init_subscriber(&config);

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = Arc::new(db::init_pool(&config).await?);
    let crypto_key = CryptoKey::new(
        config
            .crypto_key
            .clone()
            .ok_or("crypto key missing after validation")?,
    )?;
    let directory = Arc::new(LdapDirectoryClient::new());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            Migrator::up(&*db, None).await?;
            tracing::info!("Migrations applied");
        }
        Command::Serve => {
            Migrator::up(&*db, None).await?;

            let sync = Arc::new(SyncService::new(db.clone(), directory, crypto_key));
            let scheduler = SyncScheduler::new(Arc::new(config), db.clone(), sync);

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                    signal_token.cancel();
                }
            });

            scheduler.run(shutdown).await;
        }
        Command::Sync { tenant } => {
            let sync = SyncService::new(db.clone(), directory, crypto_key);
            let stats = tokio::time::timeout(
                Duration::from_secs(config.scheduler.sync_timeout_seconds),
                sync.reconcile(tenant),
            )
            .await??;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::TestConnection { tenant } => {
            let sync = SyncService::new(db.clone(), directory, crypto_key);
            let result = tokio::time::timeout(
                Duration::from_secs(config.scheduler.connection_test_timeout_seconds),
                sync.test_connection(tenant),
            )
            .await??;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
