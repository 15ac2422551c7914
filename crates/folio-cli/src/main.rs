use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use folio_storage::{PgRecordStore, RecordStore};
use folio_sync::{SyncConfig, SyncPipeline, SyncRunner, SyncScheduler};
use folio_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "folio")]
#[command(about = "Syncs owned GitHub repositories into the portfolio store and serves the site")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync once, schedule the daily sync and serve the public directory.
    Serve(ServeArgs),
    /// Run the sync pipeline once and exit.
    Sync,
    /// Apply storage migrations and exit.
    Migrate,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// The directory to serve static files from.
    #[arg(long, default_value_os_t = default_public_dir())]
    public_dir: PathBuf,
    /// Overrides FOLIO_WEB_PORT.
    #[arg(long)]
    port: Option<u16>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            public_dir: default_public_dir(),
            port: None,
        }
    }
}

/// `./public` for builds running out of the temp dir, otherwise `public`
/// beside the executable.
fn default_public_dir() -> PathBuf {
    let dev_dir = PathBuf::from("./public");
    let Ok(exe) = std::env::current_exe() else {
        return dev_dir;
    };
    if exe.starts_with(std::env::temp_dir()) {
        return dev_dir;
    }
    exe.parent().map(|dir| dir.join("public")).unwrap_or(dev_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or_else(|| Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => serve(config, args).await?,
        Commands::Sync => {
            let store = connect_store(&config).await?;
            let summary = SyncPipeline::from_config(&config, store)?
                .run_once()
                .await
                .context("sync run failed")?;
            println!(
                "sync complete: run_id={} fetched={} created={} updated={} failed={}",
                summary.run_id, summary.fetched, summary.created, summary.updated, summary.failed
            );
        }
        Commands::Migrate => {
            connect_store(&config).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn connect_store(config: &SyncConfig) -> Result<Arc<PgRecordStore>> {
    let store = PgRecordStore::connect(&config.database_url)
        .await
        .context("connecting to the record store")?;
    store.migrate().await.context("migrating the record store")?;
    Ok(Arc::new(store))
}

async fn serve(config: SyncConfig, args: ServeArgs) -> Result<()> {
    let store: Arc<dyn RecordStore> = connect_store(&config).await?;
    let listener = folio_web::bind(args.port.unwrap_or(config.web_port)).await?;

    let pipeline = SyncPipeline::from_config(&config, Arc::clone(&store))?;
    let runner = Arc::new(SyncRunner::new(pipeline));
    // Requests wait in the listen backlog until the startup sync is done.
    runner.trigger().await;

    let scheduler = SyncScheduler::maybe_build(&config, Arc::clone(&runner)).await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await?;
        info!(cron = %config.sync_cron, "sync scheduled");
    }

    folio_web::serve_on(listener, AppState::new(store, args.public_dir), shutdown_signal()).await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
