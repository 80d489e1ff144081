//! Entry point for the `vmigrate` operator binary.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, EnvFilter};
use vmigrate_core::MigrationPlan;
use vmigrate_executor::{ExecutorConfig, ProxyStore, TeardownEngine, TeardownPolicy, TrackingFile};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::ValidatePlan { file } => validate_plan(&file),
        Command::Cleanup { socket, tracking, deletion_timeout_secs } => {
            let mut config = config;
            if let Some(secs) = deletion_timeout_secs {
                config.deletion_timeout = Duration::from_secs(secs);
            }
            let tracking = tracking
                .or_else(|| config.tracking_file.clone())
                .context("no tracking file given and none configured")?;
            config.tracking_file = Some(tracking.clone());
            cleanup(&socket, &tracking, &config).await
        }
        Command::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config).context("serialize configuration")?);
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmigrate=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .context("install tracing subscriber")
}

/// Defaults, overlaid by the TOML file, overlaid by flags.
fn load_config(cli: &Cli) -> anyhow::Result<ExecutorConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))?
        }
        None => ExecutorConfig::default(),
    };
    if let Some(secs) = cli.poll_interval_secs {
        config.poll_interval = Duration::from_secs(secs);
    }
    if config.poll_interval.is_zero() {
        bail!("poll interval must be at least one second");
    }
    Ok(config)
}

fn read_plan(path: &Path) -> anyhow::Result<MigrationPlan> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text).with_context(|| format!("parse plan {}", path.display()))?
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("parse plan {}", path.display()))?
    };
    Ok(plan)
}

fn validate_plan(path: &Path) -> anyhow::Result<()> {
    let plan = read_plan(path)?;
    let hooks = plan.validate().with_context(|| format!("plan {} is invalid", path.display()))?;
    tracing::info!(
        plan = %plan.name,
        mode = plan.migration.as_str(),
        vms = plan.virtual_machines.len(),
        pre_hook = hooks.pre.is_some(),
        post_hook = hooks.post.is_some(),
        timeout_secs = plan.timeout_secs,
        "plan is valid"
    );
    Ok(())
}

async fn cleanup(socket: &Path, tracking: &Path, config: &ExecutorConfig) -> anyhow::Result<()> {
    let file = TrackingFile::read(tracking)
        .await
        .with_context(|| format!("read tracking file {}", tracking.display()))?;
    let mut ctx = file.into_context();
    tracing::info!(session = %ctx.session(), resources = ctx.records().len(), socket = %socket.display(), "cleaning up");

    let store = Arc::new(ProxyStore::new(socket));
    // Provider credentials are not available here, so cloned VMs end up as
    // leftovers. The engine rewrites the tracking file with what is left.
    let report = TeardownEngine::new(store, config).teardown(&mut ctx, TeardownPolicy::Enabled).await;

    let remaining = report.left_in_place();
    if remaining.is_empty() {
        tokio::fs::remove_file(tracking)
            .await
            .with_context(|| format!("remove tracking file {}", tracking.display()))?;
        tracing::info!(session = %ctx.session(), "all resources removed");
        return Ok(());
    }
    for leftover in report.leftovers() {
        tracing::error!(resource = %leftover.resource, "left behind");
    }
    bail!("{} resource(s) could not be removed; see {}", remaining.len(), tracking.display())
}
