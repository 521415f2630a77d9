use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stratus::catalog::CsvAirportCatalog;
use stratus::config::{self, Config};
use stratus::feed::HttpFeedSource;
use stratus::fleet::FleetRegistry;
use stratus::metrics_server;
use stratus::pipeline::Pipeline;
use stratus::sector::HttpBoundarySource;
use stratus::weather::WeatherCache;

#[derive(Parser)]
#[command(name = "stratus", about = "Snapshot fusion service for flight-simulation network data")]
struct Cli {
    /// Config file path (defaults to STRATUS_CONFIG / ./stratus.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fusion service on the configured cycle interval
    Run,
    /// Run a single cycle and print the output as JSON
    FetchOnce,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::config_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::FetchOnce => fetch_once(config).await,
    }
}

fn build_pipeline(config: &Config) -> Result<(Pipeline, Arc<WeatherCache>)> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let feed = HttpFeedSource::new(
        client.clone(),
        config.feed.snapshot_url.clone(),
        config.feed.transceivers_url.clone(),
    );
    let boundaries = HttpBoundarySource::new(
        client.clone(),
        config.boundaries.fir_url.clone(),
        config.boundaries.tracon_url.clone(),
    );
    let catalog = CsvAirportCatalog::load(&config.reference.airports_csv)?;

    let fleet = match &config.reference.fleet_json {
        Some(path) => FleetRegistry::load(path)?,
        None => {
            info!("No fleet registry configured, registrations pass through raw");
            FleetRegistry::new()
        }
    };

    let weather = Arc::new(WeatherCache::new(
        client,
        config.weather.reports_url.clone(),
        config.weather.forecasts_url.clone(),
    ));

    let pipeline = Pipeline::new(
        Arc::new(feed),
        Arc::new(boundaries),
        Arc::new(catalog),
        fleet,
        Arc::clone(&weather),
    );

    Ok((pipeline, weather))
}

async fn run(config: Config) -> Result<()> {
    metrics_server::install(config.metrics_port)?;

    let (mut pipeline, weather) = build_pipeline(&config)?;
    weather.start_refresh_task(config.weather.check_secs);

    info!(
        "Starting fusion cycles every {} seconds against {}",
        config.feed.cycle_secs, config.feed.snapshot_url
    );

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.feed.cycle_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A failed cycle leaves the caches untouched and is
                // retried on the next tick
                match pipeline.run_cycle(chrono::Utc::now()).await {
                    Ok(Some(output)) => {
                        info!(
                            "Emitted deltas: pilots +{}/~{}/-{}, sectors +{}/~{}, airports +{}/~{}",
                            output.pilots.added.len(),
                            output.pilots.updated.len(),
                            output.pilots.deleted.len(),
                            output.controllers.added.len(),
                            output.controllers.updated.len(),
                            output.airports.added.len(),
                            output.airports.updated.len(),
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        metrics::counter!("stratus.cycle.failed").increment(1);
                        error!("Cycle failed, retrying on next tick: {e:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Received shutdown signal");
                break;
            }
        }
    }

    pipeline.shutdown();
    Ok(())
}

async fn fetch_once(config: Config) -> Result<()> {
    let (mut pipeline, weather) = build_pipeline(&config)?;
    weather.refresh_if_due(chrono::Utc::now()).await;

    let output = pipeline
        .run_cycle(chrono::Utc::now())
        .await?
        .context("Feed returned no fresh snapshot")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    pipeline.shutdown();
    Ok(())
}
