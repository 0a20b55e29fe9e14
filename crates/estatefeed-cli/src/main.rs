use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use estatefeed_sync::{SyncConfig, SyncPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "estatefeed-cli")]
#[command(about = "Real-estate listing feed ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update every listing in a JSON feed file.
    Ingest { file: PathBuf },
    /// Remove listings whose queued removal date has passed.
    Sweep,
    /// Run the removal sweep on its cron schedule until Ctrl-C.
    Schedule,
    /// Print the stored raw payload of a listing.
    Show { system_id: String },
    /// Download and catalog a listing's images, in the given order.
    Images {
        system_id: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing summary")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if matches!(cli.command, Commands::Schedule) {
        config.scheduler_enabled = true;
    }
    let pipeline = SyncPipeline::connect(config).await?;

    match cli.command {
        Commands::Ingest { file } => {
            let summary = pipeline
                .ingest_file(&file)
                .await
                .with_context(|| format!("ingesting {}", file.display()))?;
            print_json(&summary)?;
        }
        Commands::Sweep => {
            print_json(&pipeline.sweep().await)?;
        }
        Commands::Schedule => {
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!("scheduler is disabled");
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!("removal sweep scheduled; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Show { system_id } => match pipeline.store().get(&system_id).await? {
            Some(raw) => println!("{raw}"),
            None => anyhow::bail!("no listing stored for {system_id}"),
        },
        Commands::Images { system_id, urls } => {
            print_json(&pipeline.sync_images(&system_id, &urls).await)?;
        }
    }

    Ok(())
}
