use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zsync_sync::{init_workbook, SyncConfig, SyncPipeline};
use zsync_zotero::FixtureLibrary;

#[derive(Debug, Parser)]
#[command(name = "zsync")]
#[command(about = "Sync a Zotero library into a literature-review workbook")]
#[command(version)]
struct Cli {
    /// YAML config file; environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read items from a library dump instead of the Zotero API
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Override the workbook path from the config
    #[arg(long, global = true)]
    workbook: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replace the ZoteroData sheet with the current library
    Sync,
    /// Create the workbook if it does not exist
    Init,
    /// Print the normalized rows as JSON without writing the workbook
    Preview,
    /// Save the raw library listing for offline runs
    Dump {
        #[arg(long)]
        out: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(workbook) = &cli.workbook {
        config.workbook_path = workbook.clone();
    }
    Ok(config)
}

fn build_pipeline(cli: &Cli, config: SyncConfig) -> Result<SyncPipeline> {
    match &cli.fixture {
        Some(path) => {
            let library = FixtureLibrary::load(path)
                .with_context(|| format!("loading library dump {}", path.display()))?;
            Ok(SyncPipeline::with_source(config, Box::new(library)))
        }
        None => SyncPipeline::new(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zsync=info,zsync_sync=info,zsync_sheet=info,zsync_zotero=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.as_ref().unwrap_or(&Commands::Sync) {
        Commands::Sync => {
            let summary = build_pipeline(&cli, config)?.run_once().await?;
            println!(
                "sync complete: run_id={} rows={} skipped={} url_lookups={} workbook={}",
                summary.run_id,
                summary.written_rows,
                summary.skipped_items,
                summary.url_lookups,
                summary.workbook_path
            );
        }
        Commands::Init => {
            let path = config.workbook_path.display().to_string();
            if init_workbook(&config)? {
                println!("created workbook {path}");
            } else {
                println!("workbook {path} already exists; left untouched");
            }
        }
        Commands::Preview => {
            let normalized = build_pipeline(&cli, config)?.preview().await?;
            info!(rows = normalized.rows.len(), "preview ready");
            println!(
                "{}",
                serde_json::to_string_pretty(&normalized).context("serializing preview")?
            );
        }
        Commands::Dump { out } => {
            let count = build_pipeline(&cli, config)?.dump(out).await?;
            println!("wrote {count} items to {}", out.display());
        }
    }

    Ok(())
}
