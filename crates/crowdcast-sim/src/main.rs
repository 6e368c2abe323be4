//! crowdcast-sim: synthetic campus occupancy
//!
//! Usage:
//!   crowdcast-sim list
//!   crowdcast-sim generate --duration 2h --seed 7 > observations.jsonl
//!   crowdcast-sim run --duration 1d --outage 0.02 --horizon 30
//!   crowdcast-sim serve --port 8080

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::{Parser, Subcommand};
use crowdcast_core::{
    CycleOutcome, CycleRunner, EngineConfig, Forecaster, ManualClock, ObservationRecord, Result,
    Zone,
};
use crowdcast_sim::{CampusSimulator, SimConfig, SimulatedSource, default_campus};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crowdcast-sim")]
#[command(about = "Synthetic campus occupancy for the crowdcast forecaster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct SimArgs {
    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated minutes between samples
    #[arg(long, default_value = "5")]
    step_minutes: u32,

    /// Noise standard deviation as a fraction of capacity
    #[arg(long, default_value = "0.04")]
    noise: f64,

    /// Probability that a fetch fails
    #[arg(long, default_value = "0.0")]
    outage: f64,

    /// Start of simulated time (RFC 3339). Today at midnight UTC by default.
    #[arg(long)]
    start: Option<DateTime<Utc>>,
}

impl SimArgs {
    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            step_minutes: self.step_minutes,
            noise_ratio: self.noise,
            outage_probability: self.outage,
            ..SimConfig::default()
        }
    }

    fn start(&self) -> DateTime<Utc> {
        self.start.unwrap_or_else(|| {
            let now = Utc::now();
            now.duration_trunc(Duration::days(1)).unwrap_or(now)
        })
    }

    fn simulator(&self) -> Result<CampusSimulator> {
        CampusSimulator::campus(self.config(), self.start())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the simulated zones
    List,

    /// Write observations as JSON lines to stdout
    Generate {
        /// Simulated duration (e.g. 90m, 6h, 2d)
        #[arg(short, long, default_value = "1h", value_parser = parse_duration)]
        duration: Duration,

        #[command(flatten)]
        sim: SimArgs,
    },

    /// Drive an in-process forecaster over simulated time
    Run {
        /// Simulated duration (e.g. 90m, 6h, 2d)
        #[arg(short, long, default_value = "1d", value_parser = parse_duration)]
        duration: Duration,

        /// Horizon to print, in minutes
        #[arg(long, default_value = "30")]
        horizon: u32,

        /// Print predictions every N cycles
        #[arg(long, default_value = "12")]
        every: u64,

        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        sim: SimArgs,
    },

    /// Serve live samples for forecastd to poll
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[command(flatten)]
        sim: SimArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => run_list(),
        Commands::Generate { duration, sim } => run_generate(duration, &sim),
        Commands::Run {
            duration,
            horizon,
            every,
            config,
            sim,
        } => run_engine(duration, horizon, every, config, &sim).await,
        Commands::Serve { port, host, sim } => run_serve(host, port, &sim).await,
    }
}

fn run_list() -> Result<()> {
    println!("{:<10} {:<28} {:>8}  {}", "ZONE", "NAME", "CAPACITY", "KIND");
    for zone in default_campus() {
        let capacity = zone
            .capacity
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<28} {:>8}  {}",
            zone.id,
            zone.name,
            capacity,
            zone.kind.as_deref().unwrap_or("generic")
        );
    }
    Ok(())
}

fn run_generate(duration: Duration, args: &SimArgs) -> Result<()> {
    let mut sim = args.simulator()?;
    let steps = steps_for(duration, args.step_minutes);
    eprintln!("generating {} steps from {}", steps, sim.now());

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0u64;

    for _ in 0..steps {
        for obs in sim.step() {
            let record = ObservationRecord::from(&obs);
            serde_json::to_writer(&mut out, &record).map_err(std::io::Error::other)?;
            out.write_all(b"\n")?;
            written += 1;
        }
    }
    out.flush()?;

    eprintln!("wrote {} observations, simulated clock at {}", written, sim.now());
    Ok(())
}

async fn run_engine(
    duration: Duration,
    horizon: u32,
    every: u64,
    config: Option<PathBuf>,
    args: &SimArgs,
) -> Result<()> {
    let engine_config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let mut config = EngineConfig::default();
            config.forecast.observation_interval_minutes = args.step_minutes;
            config
        }
    };

    let sim = args.simulator()?;
    let catalog = sim.catalog()?;
    let clock = Arc::new(ManualClock::new(sim.now()));
    let source = Arc::new(SimulatedSource::new(sim).with_clock(clock.clone()));

    let forecaster = Forecaster::new(engine_config)?.with_clock(clock.clone());
    forecaster.load_catalog(catalog);
    let mut runner = CycleRunner::new(forecaster.clone()).with_source(source);

    let steps = steps_for(duration, args.step_minutes);
    let every = every.max(1);
    let mut skipped = 0u64;

    for _ in 0..steps {
        let report = runner.run_tick().await;
        if let CycleOutcome::Skipped { reason } = &report.outcome {
            skipped += 1;
            warn!(tick = report.tick, reason = %reason, "cycle skipped");
            continue;
        }
        if report.tick % every != 0 {
            continue;
        }

        println!(
            "\n{}  tick {}  refit {}  fallbacks {}",
            forecaster.now().format("%a %H:%M"),
            report.tick,
            report.zones_refit,
            report.fallbacks
        );
        for p in forecaster.get_all_predictions(horizon) {
            let band = p
                .confidence
                .map(|ci| format!("[{:.0}, {:.0}]", ci.lower, ci.upper))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<10} now {:>4}  +{}m {:>4}  {:<14} {}",
                p.zone_id, p.current_count, horizon, p.predicted_count, band, p.model_tag
            );
        }
    }

    let stats = forecaster.stats();
    println!(
        "\n{} cycles ({} skipped), {} zones, {} updates, {} refits",
        steps, skipped, stats.total_zones, stats.updates, stats.refits
    );
    Ok(())
}

#[derive(Clone)]
struct ServeState {
    sim: Arc<Mutex<CampusSimulator>>,
}

async fn observations_handler(
    State(state): State<ServeState>,
) -> std::result::Result<Json<Vec<ObservationRecord>>, StatusCode> {
    let mut sim = state
        .sim
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if sim.outage() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let batch = sim.sample_at(Utc::now());
    Ok(Json(batch.iter().map(ObservationRecord::from).collect()))
}

async fn zones_handler(State(state): State<ServeState>) -> Json<Vec<Zone>> {
    let sim = state
        .sim
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(sim.zones().cloned().collect())
}

async fn run_serve(host: String, port: u16, args: &SimArgs) -> Result<()> {
    let state = ServeState {
        sim: Arc::new(Mutex::new(args.simulator()?)),
    };

    let app = Router::new()
        .route("/observations", get(observations_handler))
        .route("/zones", get(zones_handler))
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "simulator listening");
    eprintln!("crowdcast-sim serving on http://{}", addr);
    eprintln!("  GET /observations - one live sample per zone");
    eprintln!("  GET /zones        - zone catalog");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install CTRL+C handler");
            }
        })
        .await?;
    Ok(())
}

fn steps_for(duration: Duration, step_minutes: u32) -> i64 {
    duration.num_minutes() / step_minutes.max(1) as i64
}

/// Parse `90s`, `15m`, `6h`, `2d` or bare seconds.
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c)),
        _ => (s, None),
    };
    let n: i64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    match unit {
        None | Some('s') => Ok(Duration::seconds(n)),
        Some('m') => Ok(Duration::minutes(n)),
        Some('h') => Ok(Duration::hours(n)),
        Some('d') => Ok(Duration::days(n)),
        Some(other) => Err(format!("unknown duration unit '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_duration(" 6h ").unwrap(), Duration::hours(6));
        assert_eq!(parse_duration("2d").unwrap(), Duration::days(2));
        assert_eq!(parse_duration("30").unwrap(), Duration::seconds(30));
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_steps_for() {
        assert_eq!(steps_for(Duration::hours(1), 5), 12);
        assert_eq!(steps_for(Duration::minutes(4), 5), 0);
        assert_eq!(steps_for(Duration::hours(1), 0), 60);
    }
}
