use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use vax_etl::config::{AppConfig, FeedConfig, LocationConfig};
use vax_etl::domain::ManufacturerMetadata;
use vax_etl::logging;
use vax_etl::pipeline::{self, IngestOutcome, IngestResult};
use vax_etl::series::MergeOutcome;
use vax_etl::sources::file::{FileSource, PayloadKind};
use vax_etl::sources::VaxSource;
use vax_etl::storage::{FsStore, SeriesStore};

#[derive(Parser)]
#[command(name = "vax_etl")]
#[command(about = "Vaccination data normalization and merge pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the run configuration
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest per-location collaborator payloads
    Ingest {
        /// Specific locations to run (comma-separated); all when omitted
        #[arg(long)]
        locations: Option<String>,
    },
    /// Reconcile and merge the configured aggregate feeds
    Aggregate,
    /// Run per-location ingestion and aggregate feeds sequentially
    Run {
        /// Specific locations to run (comma-separated)
        #[arg(long)]
        locations: Option<String>,
    },
}

fn build_location_source(cfg: &LocationConfig) -> FileSource {
    let mut source = FileSource::new(&cfg.source_id, &cfg.location, &cfg.payload, cfg.kind);
    source.columns = cfg.columns.clone();
    source.date_format = cfg.date_format.clone();
    source.vaccine_mapping = cfg.vaccine_mapping.clone();
    if cfg.kind == PayloadKind::Manufacturer {
        source.metadata = Some(ManufacturerMetadata {
            location: cfg.location.clone(),
            vaccine_source_name: cfg
                .vaccine_source_name
                .clone()
                .unwrap_or_else(|| cfg.source_id.clone()),
            source_url: cfg.source_url.clone(),
        });
    }
    source
}

fn build_feed_source(cfg: &FeedConfig) -> FileSource {
    let mut source = FileSource::new(&cfg.source_id, &cfg.source_id, &cfg.payload, PayloadKind::Feed);
    source.columns = cfg.columns.clone();
    source.date_format = cfg.date_format.clone();
    source
}

fn describe(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Merged(MergeOutcome::Inserted) => "merged (new date)".to_string(),
        IngestOutcome::Merged(MergeOutcome::Replaced) => "merged (replaced date)".to_string(),
        IngestOutcome::Merged(MergeOutcome::Unchanged) => "already up to date".to_string(),
        IngestOutcome::Replaced { rows } => format!("series replaced ({rows} rows)"),
        IngestOutcome::ManufacturerExported { records } => {
            format!("manufacturer breakdown exported ({records} records)")
        }
        IngestOutcome::SkippedUnchangedPayload => "payload unchanged, skipped".to_string(),
        IngestOutcome::SkippedRegression { field } => {
            format!("regression in {field} skipped per exception list")
        }
    }
}

fn report(results: &[vax_etl::error::Result<IngestResult>]) {
    let ok = results.iter().filter(|r| r.is_ok()).count();
    println!("\n📊 Pipeline results: {ok}/{} locations succeeded", results.len());
    for result in results {
        match result {
            Ok(result) => println!("   ✅ {}: {}", result.location, describe(&result.outcome)),
            Err(e) => {
                error!("location run failed: {e}");
                println!("   ❌ {e}");
            }
        }
    }
}

async fn run_ingest(
    config: &AppConfig,
    locations: Option<&str>,
    store: Arc<dyn SeriesStore>,
) {
    let selected: Option<Vec<&str>> =
        locations.map(|list| list.split(',').map(str::trim).collect());
    let jobs: Vec<(Arc<dyn VaxSource>, LocationConfig)> = config
        .locations
        .iter()
        .filter(|cfg| {
            selected
                .as_ref()
                .map_or(true, |names| names.contains(&cfg.location.as_str()))
        })
        .map(|cfg| {
            (
                Arc::new(build_location_source(cfg)) as Arc<dyn VaxSource>,
                cfg.clone(),
            )
        })
        .collect();

    if jobs.is_empty() {
        warn!("no configured locations matched");
        println!("⚠️  No configured locations matched");
        return;
    }

    info!(locations = jobs.len(), "running per-location ingestion");
    let results = pipeline::run_locations(jobs, store).await;
    report(&results);
}

async fn run_aggregate(config: &AppConfig, store: &dyn SeriesStore) {
    for feed in &config.feeds {
        println!("🌐 Reconciling feed {}...", feed.source_id);
        let source = build_feed_source(feed);
        match pipeline::run_feed(&source, feed, store).await {
            Ok(results) => {
                let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
                println!("   ✅ {ok}/{} locations merged", results.len());
                for (location, result) in &results {
                    if let Err(e) = result {
                        println!("   ❌ {location}: {e}");
                    }
                }
            }
            Err(e) => {
                error!("feed {} rejected: {e}", feed.source_id);
                println!("   ❌ Feed rejected: {e}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let store: Arc<dyn SeriesStore> = Arc::new(FsStore::new(&config.output_dir));

    match cli.command {
        Commands::Ingest { locations } => {
            println!("🔄 Running per-location ingestion...");
            run_ingest(&config, locations.as_deref(), store).await;
        }
        Commands::Aggregate => {
            println!("🌐 Running aggregate feeds...");
            run_aggregate(&config, store.as_ref()).await;
        }
        Commands::Run { locations } => {
            println!("🚀 Running full pipeline (locations + feeds)...");
            run_ingest(&config, locations.as_deref(), store.clone()).await;
            run_aggregate(&config, store.as_ref()).await;
        }
    }
    Ok(())
}
