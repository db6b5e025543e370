use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use uuid::Uuid;

use forgecrew::ForgeConfig;

/// Autonomous code-change production engine.
#[derive(Parser, Debug)]
#[command(name = "forgecrew", version, about)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Validate the configuration and print the roster, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ForgeConfig::load(path)?,
        None => ForgeConfig::default(),
    };
    config.validate()?;

    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        threshold = config.quality_threshold,
        rounds = config.max_outer_rounds,
        consensus = config.consensus_required,
        "Engine configuration loaded"
    );
    for (i, tier) in config.roster.iter().enumerate() {
        info!(tier = i + 1, name = %tier.name, model = %tier.model.model, "  roster");
    }

    if cli.check {
        info!("Configuration valid.");
        return Ok(());
    }

    // The engine needs a ModelClient, ToolExecutor, WorkspaceManager, and
    // RepoMapProvider supplied by the surrounding system; the binary only
    // validates configuration. Embed the library to run tasks.
    info!("No collaborators wired in this binary; see the library API.");

    Ok(())
}
