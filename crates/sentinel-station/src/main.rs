use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentinel_core::{GalleryBuilder, GalleryStore, ScanError, ScanSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod alerts;
mod config;
mod directory;
mod engine;
mod fetch;

use alerts::SqliteAlertSink;
use config::Config;
use fetch::ReferenceFetcher;

#[derive(Parser)]
#[command(name = "sentinel", about = "Watch-list face scanning station")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the gallery from the identity directory and report on it
    Gallery {
        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan probe images against the gallery
    Scan {
        /// Operator recorded on any alert raised
        #[arg(short, long)]
        operator: String,
        /// Override the configured match threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Probe images
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List recent alerts
    Alerts {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Check that the models load and the directory is reachable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    config.validate()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted; cancelling");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Gallery { json } => gallery(&config, json, &cancel).await,
        Commands::Scan {
            operator,
            threshold,
            images,
        } => scan(&config, &operator, threshold, &images, &cancel).await,
        Commands::Alerts { limit } => {
            let sink = SqliteAlertSink::open(&config.db_path).await?;
            for alert in sink.recent(limit).await? {
                println!(
                    "{}  {:<12} {:<24} conf={:>3}  by={} at {}  [{}]",
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.identity_id,
                    alert.display_name,
                    alert.confidence,
                    alert.scanned_by,
                    alert.station,
                    alert.status.as_str(),
                );
            }
            Ok(())
        }
        Commands::Check => check(&config).await,
    }
}

fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.fetch_timeout())
        .build()
        .context("building HTTP client")
}

fn gallery_store(config: &Config, extractor: engine::EngineHandle) -> Result<Arc<GalleryStore>> {
    let client = http_client(config)?;
    let base_dir = (!directory::is_http(&config.directory))
        .then(|| {
            let path = config.directory.strip_prefix("file://").unwrap_or(&config.directory);
            Path::new(path).parent().map(Path::to_path_buf)
        })
        .flatten();

    let fetcher = ReferenceFetcher::new(client.clone()).with_base_dir(base_dir);
    let builder = GalleryBuilder::new(Arc::new(fetcher), Arc::new(extractor))
        .with_max_candidates(config.max_candidates);
    let directory = directory::open(&config.directory, client);
    Ok(Arc::new(GalleryStore::new(directory, builder)))
}

fn start_engine(config: &Config) -> Result<engine::EngineHandle> {
    engine::spawn_onnx(&config.scrfd_model_path(), &config.arcface_model_path())
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

async fn gallery(config: &Config, json: bool, cancel: &CancellationToken) -> Result<()> {
    let store = gallery_store(config, start_engine(config)?)?;
    let outcome = store.rebuild(true, cancel).await?;
    let report = outcome.report.unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for entry in outcome.gallery.iter() {
        println!(
            "{:<12} {:<24} {}",
            entry.identity_id, entry.display_name, entry.reference_image_ref
        );
    }
    println!(
        "{} enrolled of {} considered, {} skipped, {} beyond limit",
        report.enrolled,
        report.considered,
        report.skipped.len(),
        report.truncated
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {:?}", skipped.identity_id, skipped.reason);
    }
    Ok(())
}

async fn scan(
    config: &Config,
    operator: &str,
    threshold: Option<f32>,
    images: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<()> {
    let engine = start_engine(config)?;
    let store = gallery_store(config, engine.clone())?;
    let sink = SqliteAlertSink::open(&config.db_path).await?;

    if let Err(e) = store.rebuild(false, cancel).await {
        // Scans still run; they report that no reference data is available.
        tracing::error!(error = %e, "gallery build failed");
    }

    let session = ScanSession::new(store, Arc::new(engine), Arc::new(sink), &config.station_id)
        .with_threshold(threshold.unwrap_or(config.match_threshold));

    for path in images {
        let image = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || image::open(&path)).await?
        }
        .with_context(|| format!("opening {}", path.display()))?;

        match session.scan(image, operator, cancel).await {
            Ok(outcome) => {
                println!("{}: {}", path.display(), serde_json::to_string(&outcome)?);
            }
            Err(ScanError::AlertNotRecorded { alert, source }) => {
                // The match stands even though the log write failed.
                println!("{}: {}", path.display(), serde_json::to_string(&alert)?);
                anyhow::bail!("alert {} not recorded: {source}", alert.id);
            }
            Err(e) => return Err(e).with_context(|| format!("scanning {}", path.display())),
        }
    }
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    start_engine(config)?;
    println!("models: ok ({})", config.model_dir.display());

    let directory = directory::open(&config.directory, http_client(config)?);
    let candidates = directory
        .candidates()
        .await
        .with_context(|| format!("reading identity directory {}", config.directory))?;
    let usable = candidates.iter().filter(|c| c.reference().is_some()).count();
    println!(
        "directory: ok ({} candidates, {} with reference images)",
        candidates.len(),
        usable
    );

    SqliteAlertSink::open(&config.db_path).await?;
    println!("alert log: ok ({})", config.db_path.display());
    Ok(())
}
