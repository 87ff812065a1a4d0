//! # lapse - lead expiration sweeper
//!
//! Runs the sweep against in-memory stores seeded with demo leads and prints
//! live pushes as they arrive.
//!
//! Usage:
//!   lapse                          # schedule from config, run until Ctrl-C
//!   lapse --config lapse.toml      # load settings (LAPSE_* env vars override)
//!   lapse --once --seed 40         # single sweep over 40 demo leads, JSON report

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lapse_core::app::{SchedulerState, SweepConfig, Sweeper};
use lapse_core::domain::{Lead, LeadId, Notification, Recipient, RunResultView, UserId};
use lapse_core::impls::{ConnectionRegistry, InMemoryLeadStore, InMemoryNotificationStore};

#[derive(Parser, Debug)]
#[command(name = "lapse", version, about = "Expire overdue leads and notify their owners")]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of demo leads to seed
    #[arg(long, default_value_t = 25)]
    seed: usize,

    /// Run a single sweep, print the report as JSON and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "lapse=debug,lapse_core=debug"
    } else {
        "lapse=info,lapse_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    let leads = Arc::new(InMemoryLeadStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let registry = Arc::new(ConnectionRegistry::new(config.push_buffer));

    let owners: Vec<UserId> = (0..3).map(|_| UserId::generate()).collect();
    leads.extend(demo_leads(&owners, cli.seed)).await;
    for owner in &owners {
        listen(*owner, registry.connect(Recipient::User(*owner)));
    }
    listen_system(registry.connect(Recipient::System));

    let sweeper = Sweeper::builder(config)
        .lead_store(leads.clone())
        .notification_store(notifications.clone())
        .delivery(registry.clone())
        .build()
        .context("invalid sweep setup")?;

    if cli.once {
        let outcome = sweeper.run_once().await;
        let view = RunResultView::from(&outcome);
        println!("{}", serde_json::to_string_pretty(&view)?);
        return match outcome.error() {
            Some(err) => Err(anyhow::anyhow!("sweep failed: {err}")),
            None => Ok(()),
        };
    }

    info!(schedule = %sweeper.schedule(), leads = leads.len().await, "starting sweeper");
    let handle = sweeper.start();
    let health = handle.health();
    let mut stopped = handle.health();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutdown requested");
        }
        // The loop can end on its own: disabled by config, or fail-stop.
        _ = stopped.wait_until(|status| status.state == SchedulerState::Stopped) => {
            warn!("scheduler stopped without a shutdown request");
        }
    }

    let result = handle.shutdown_and_join().await;
    println!("{}", serde_json::to_string_pretty(&health.snapshot())?);
    info!(
        notifications = notifications.all().await.len(),
        "sweeper stopped"
    );
    result.context("scheduler stopped on an unexpected error")
}

fn load_config(path: Option<&std::path::Path>) -> Result<SweepConfig> {
    let mut config = match path {
        Some(path) => SweepConfig::from_toml_file(path)?,
        None => SweepConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Three quarters overdue, the rest due in the future; every seventh lead
/// has no owner.
fn demo_leads(owners: &[UserId], count: usize) -> Vec<Lead> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let owner = (i % 7 != 6).then(|| owners[i % owners.len()]);
            let expires_at = if i % 4 == 3 {
                now + Duration::hours(i as i64 + 1)
            } else {
                now - Duration::minutes(i as i64 + 1)
            };
            Lead::new(LeadId::generate(), owner, expires_at, now - Duration::days(2))
        })
        .collect()
}

fn listen(owner: UserId, mut rx: mpsc::Receiver<Notification>) {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            info!(
                owner = %owner,
                category = notification.category.as_str(),
                leads = notification.lead_ids().len(),
                "push: {}",
                notification.title
            );
        }
    });
}

fn listen_system(mut rx: mpsc::Receiver<Notification>) {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            warn!(payload = %notification.payload, "system: {}", notification.title);
        }
    });
}
