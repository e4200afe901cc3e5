use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rcreviews_adapters::TokenProvider;
use rcreviews_storage::PgStore;
use rcreviews_sync::{run_sync_once, ImportMode, SyncConfig, SyncRuntime};

mod logging;

#[derive(Debug, Parser)]
#[command(name = "rcreviews-cli")]
#[command(about = "Import realestate.com.au agency reviews and serve them")]
struct Cli {
    /// YAML config file; defaults to `RCREVIEWS_CONFIG` or `rcreviews.yaml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import the last thirty days of reviews once.
    Sync,
    /// Walk every page of reviews.
    Import {
        #[arg(long)]
        full: bool,
    },
    /// Delete every stored review of the current post type.
    Empty,
    /// Request a new access token and store it.
    Token,
    /// Apply database migrations.
    Migrate,
    /// Serve the listing and admin endpoints with the scheduler.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.log_json);

    let config = SyncConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_sync_once(config, ImportMode::Incremental).await?;
            println!(
                "sync complete: run_id={} pages={} inserted={} updated={} skipped={} total={}",
                summary.run_id,
                summary.pages,
                summary.inserted,
                summary.updated,
                summary.skipped,
                summary.total_posts
            );
        }
        Commands::Import { full } => {
            let mode = if full {
                ImportMode::Full
            } else {
                ImportMode::Incremental
            };
            let summary = run_sync_once(config, mode).await?;
            println!(
                "import complete: mode={:?} pages={} inserted={} updated={} stopped={:?} total={}",
                summary.mode,
                summary.pages,
                summary.inserted,
                summary.updated,
                summary.stopped,
                summary.total_posts
            );
        }
        Commands::Empty => {
            let runtime = SyncRuntime::from_config(config).await?;
            let remaining = runtime.importer.empty().await?;
            println!("reviews emptied: remaining={remaining}");
        }
        Commands::Token => {
            let runtime = SyncRuntime::from_config(config).await?;
            let token = runtime
                .tokens
                .refresh()
                .await
                .context("requesting access token")?;
            println!("access token stored ({} chars)", token.len());
        }
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL is not set");
            };
            PgStore::connect(url)
                .await
                .context("connecting to database")?
                .migrate()
                .await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            rcreviews_web::serve(config).await?;
        }
    }

    Ok(())
}
