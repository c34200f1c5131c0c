// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of APSchool Bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod config;
mod publisher;
mod version;

use anyhow::{Context, Result};
use apschool_client::ApSchoolClient;
use apschool_core::{
    AccountDataCoordinator, AccountDataSource, CoordinatorExit, UpdateOutcome, check_credentials,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::publisher::SensorPublisher;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Run,
    Check,
    SaveConfig(PathBuf),
}

fn main() -> Result<()> {
    // Handle command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut mode = Mode::Run;
    if args.len() > 1 {
        match args[1].as_str() {
            "--help" | "-h" => {
                println!("APSchool Bridge - school account balances and messages");
                println!("Version: {}", version::VERSION);
                println!();
                println!("Usage: apschool [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help    Print this help message");
                println!("  -v, --version Print version");
                println!("      --check   Validate credentials with one fetch and exit");
                println!("      --save-config <PATH>");
                println!("                Write the effective configuration as TOML and exit");
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{}", version::VERSION);
                return Ok(());
            }
            "--check" => mode = Mode::Check,
            "--save-config" => {
                let path = args
                    .get(2)
                    .context("--save-config needs a destination path")?;
                mode = Mode::SaveConfig(PathBuf::from(path));
            }
            other => {
                anyhow::bail!("Unknown argument '{other}', see --help");
            }
        }
    }

    let (config, source) = config::AppConfig::load()?;

    // Initialize tracing with env filter support
    // RUST_LOG wins over the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.system.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default subscriber failed")?;

    info!("📁 Configuration loaded from {source}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match mode {
        Mode::Check => runtime.block_on(check(config)),
        Mode::Run => runtime.block_on(run(config)),
        Mode::SaveConfig(path) => {
            config.save(&path)?;
            info!("💾 Configuration written to {}", path.display());
            Ok(())
        }
    }
}

fn create_source(config: &AppConfig) -> Result<Arc<dyn AccountDataSource>> {
    let client = ApSchoolClient::new(config.credential())?;
    Ok(Arc::new(client))
}

async fn check(config: AppConfig) -> Result<()> {
    let source = create_source(&config)?;

    match check_credentials(source.as_ref()).await {
        Ok(accounts) => {
            for account in &accounts {
                info!(
                    "   - {} ({}): {:.2} €",
                    account.full_name(),
                    account.account_id,
                    account.balance
                );
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("Credential check failed [{}]: {e}", e.form_key()),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("🚀 Starting APSchool Bridge v{}", version::VERSION);
    info!("📋 Configuration Summary:");
    info!("   Portal: {}", config.account.base_url);
    info!("   Username: {}", config.account.username);
    info!("   Scan interval: {} min", config.scan_interval().as_secs() / 60);
    if config.scan_interval_clamped() {
        warn!(
            "⚠️ Scan interval of {} min is below the minimum, using {} min",
            config.options.scan_interval,
            apschool_core::MIN_SCAN_INTERVAL_MINUTES
        );
    }
    if let Some(path) = &config.system.state_file {
        info!("   State file: {path}");
    }

    let source = create_source(&config)?;
    info!("🔌 Account data source: {}", source.name());

    let coordinator = AccountDataCoordinator::new(source, config.scan_interval());
    let publisher = SensorPublisher::new(config.system.state_file.as_ref().map(PathBuf::from));
    let publisher_task = tokio::spawn(publisher.run(coordinator.subscribe()));

    // First refresh runs before the schedule starts
    match coordinator.refresh().await {
        UpdateOutcome::Published { accounts } => {
            info!("✅ Initial fetch published {accounts} account(s)");
        }
        UpdateOutcome::UpdateFailed { reason } => {
            warn!("⚠️ Initial fetch failed, retrying on schedule: {reason}");
        }
        UpdateOutcome::ReauthRequired { reason } => {
            anyhow::bail!("Credentials rejected by APSchool, update them and restart: {reason}");
        }
        UpdateOutcome::Skipped => {}
    }

    let exit = coordinator.run(shutdown_signal()).await;

    let status = coordinator_status_json(&coordinator);
    info!(
        "📋 Final status: {status} ({} account(s) held)",
        coordinator.data().len()
    );
    drop(coordinator);
    if let Err(e) = publisher_task.await {
        error!("❌ Sensor publisher task failed: {e}");
    }

    match exit {
        CoordinatorExit::Shutdown => {
            info!("👋 Shutting down");
            Ok(())
        }
        CoordinatorExit::ReauthRequired => {
            anyhow::bail!("Credentials rejected by APSchool, update them and restart")
        }
    }
}

fn coordinator_status_json(coordinator: &AccountDataCoordinator) -> String {
    serde_json::to_string(&coordinator.status())
        .unwrap_or_else(|e| format!("<unserializable status: {e}>"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
