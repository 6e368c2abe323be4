//! forecastd: runs the poller and forecast cycle against an upstream feed and
//! exposes operational endpoints.

use axum::{Json, Router, extract::State, routing::get};
use clap::Parser;
use crowdcast_core::{
    CycleRunner, EngineConfig, FileSink, Forecaster, HttpObservationSource, MemorySink,
    ObservationSource, PersistenceSink, Poller, Scheduler, ZoneCatalog, metrics,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "forecastd")]
#[command(about = "Crowd occupancy forecasting daemon", long_about = None)]
struct Args {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Zone catalog (JSON array of zones)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Upstream observation endpoint; overrides `source.url`
    #[arg(long)]
    source_url: Option<String>,

    /// Directory for model checkpoints and prediction logs. In-memory only
    /// when omitted.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address for /metrics, /health and /stats
    #[arg(long, default_value = "0.0.0.0:9464")]
    metrics_addr: String,
}

#[derive(Serialize)]
struct StatsResponse {
    zones: usize,
    dynamic_registrations: u64,
    evictions: u64,
    updates: u64,
    ignored: u64,
    rejected: u64,
    refits: u64,
}

async fn metrics_handler() -> String {
    metrics::render()
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(forecaster): State<Forecaster>) -> Json<StatsResponse> {
    let stats = forecaster.stats();
    Json(StatsResponse {
        zones: stats.total_zones,
        dynamic_registrations: stats.dynamic_registrations,
        evictions: stats.evictions,
        updates: stats.updates,
        ignored: stats.ignored,
        rejected: stats.rejected,
        refits: stats.refits,
    })
}

#[tokio::main]
async fn main() -> crowdcast_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = &args.source_url {
        config.source.url = Some(url.clone());
    }
    config.validate()?;

    let sink: Arc<dyn PersistenceSink> = match &args.data_dir {
        Some(dir) => {
            let sink = FileSink::open(dir)?;
            info!(dir = %dir.display(), "file persistence enabled");
            Arc::new(sink)
        }
        None => {
            warn!("no data directory given, model state will not survive restarts");
            Arc::new(MemorySink::new())
        }
    };

    let forecaster = Forecaster::with_sink(config.clone(), sink)?;

    if let Some(path) = &args.catalog {
        forecaster.load_catalog(ZoneCatalog::load(path)?);
    }
    let hydrated = forecaster.hydrate().await?;
    info!(zones = hydrated, "model store ready");

    let source: Option<Arc<dyn ObservationSource>> = match &config.source.url {
        Some(url) => Some(Arc::new(HttpObservationSource::new(
            url.clone(),
            config.source.clone(),
        )?)),
        None => {
            warn!("no upstream source configured, cycles will only publish submitted observations");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if let Some(source) = &source {
        let mut poller = Poller::new(forecaster.clone(), source.clone());
        let scheduler = Scheduler::new("poller", config.scheduler.poll_interval(), shutdown.clone());
        tasks.push(tokio::spawn(async move {
            scheduler.run(&mut poller).await;
        }));
    }

    let mut runner = CycleRunner::new(forecaster.clone());
    if let Some(source) = source {
        runner = runner.with_source(source);
    }
    let scheduler = Scheduler::new("cycle", config.scheduler.cycle_interval(), shutdown.clone());
    tasks.push(tokio::spawn(async move {
        scheduler.run(&mut runner).await;
    }));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(forecaster.clone());

    let listener = TcpListener::bind(&args.metrics_addr).await?;
    info!(addr = %args.metrics_addr, "forecastd listening");
    info!("  GET /metrics - Prometheus metrics");
    info!("  GET /health  - Health check");
    info!("  GET /stats   - Model store stats");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install CTRL+C handler");
            }
            info!("shutting down");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "scheduler task panicked");
        }
    }

    info!(zones = forecaster.stats().total_zones, "stopped");
    Ok(())
}
