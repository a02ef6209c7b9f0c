use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use carbon_decider::carbon_aware::{
    locate_by_ip, plot, CarbonIntensityAPI, Coordinates, DeciderConfig, DecisionEngine, Evaluation,
    Location,
};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code when now is a good time to run, also used for --help
const EXIT_RUN_NOW: u8 = 0;
/// Exit code for any fatal error
const EXIT_FAILURE: u8 = 1;
/// Exit code when it is better to wait
const EXIT_WAIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decide whether to run now (exit 0) or wait (exit 2)
    Check(CheckArgs),
    /// Show the latest carbon intensity for a location
    Latest(LatestArgs),
    /// Show the latest electricity consumption mix for a location
    Breakdown(LatestArgs),
    /// Show version information
    Version,
}

#[derive(clap::Args, Debug)]
struct LocationArgs {
    /// Grid zone code (e.g. NL, DE); the location is geolocated by IP when omitted
    #[arg(long, short = 'z', env = "CARBON_ZONE")]
    zone: Option<String>,

    /// Latitude in decimal degrees (use together with --lon)
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude in decimal degrees (use together with --lat)
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "CARBON_DECIDER_CONFIG")]
    config: Option<PathBuf>,

    /// Electricity Maps API key
    #[arg(long, env = "ELECTRICITYMAPS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Electricity Maps API base URL
    #[arg(long, env = "ELECTRICITYMAPS_API_URL")]
    api_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Use synthetic data instead of calling the API
    #[arg(long)]
    mock: bool,

    /// Print intermediate statistics
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, env = "CARBON_DECIDER_LOG_JSON")]
    log_json: bool,
}

#[derive(clap::Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[command(flatten)]
    common: CommonArgs,

    /// Write the 24h chart
    #[arg(long)]
    plot: bool,

    /// Where to write the chart
    #[arg(long, default_value = "carbon-intensity-24h.svg")]
    plot_output: PathBuf,

    /// Wait while carbon intensity is falling fast
    #[arg(long)]
    use_derivative: bool,

    /// Run only when current intensity is this far below the mean (gCO2eq/kWh)
    #[arg(long, allow_hyphen_values = true)]
    below_mean_offset: Option<f64>,

    /// Slope in gCO2eq/kWh/hour below which intensity counts as falling fast
    #[arg(long, allow_hyphen_values = true)]
    delta_cutoff: Option<f64>,

    /// Print the decision as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct LatestArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // clap's own exit on a usage error is 2, which callers would read as "wait"
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_exit_code(e.kind()));
        }
    };

    let result = match args.command {
        Commands::Version => {
            println!("carbon-decider v{}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Commands::Check(check_args) => {
            init_tracing(&check_args.common);
            run_check(check_args).await
        }
        Commands::Latest(latest_args) => {
            init_tracing(&latest_args.common);
            run_latest(latest_args).await.map(|()| EXIT_RUN_NOW)
        }
        Commands::Breakdown(breakdown_args) => {
            init_tracing(&breakdown_args.common);
            run_breakdown(breakdown_args).await.map(|()| EXIT_RUN_NOW)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            // the subscriber may filter the event out
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Exit code for a failed argument parse
fn usage_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_RUN_NOW,
        _ => EXIT_FAILURE,
    }
}

/// Exit code for a finished check
fn decision_exit_code(run_now: bool) -> u8 {
    if run_now {
        EXIT_RUN_NOW
    } else {
        EXIT_WAIT
    }
}

fn init_tracing(common: &CommonArgs) {
    let default_level = if common.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // stdout carries the report, logs go to stderr
    let json_layer = common
        .log_json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!common.log_json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Merge the config file (if any) with command line overrides
fn load_config(common: &CommonArgs) -> anyhow::Result<DeciderConfig> {
    let mut config = match &common.config {
        Some(path) => DeciderConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DeciderConfig::default(),
    };

    if let Some(key) = &common.api_key {
        config.api.token = key.clone();
    }
    if let Some(url) = &common.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(timeout) = common.timeout_secs {
        config.api.timeout_secs = timeout;
    }
    if common.mock {
        config.api.mock = true;
    }

    Ok(config)
}

/// Pick the location: --zone, then --lat/--lon, then the configured default
/// zone, then IP geolocation.
async fn resolve_location(
    args: &LocationArgs,
    config: &DeciderConfig,
    api: &CarbonIntensityAPI,
) -> anyhow::Result<Location> {
    if let Some(zone) = &args.zone {
        return Ok(Location::Zone(zone.clone()));
    }
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        let coords = Coordinates::new(lat, lon)
            .with_context(|| format!("coordinates out of range: {lat},{lon}"))?;
        return Ok(Location::Coordinates(coords));
    }
    if let Some(zone) = &config.default_zone {
        return Ok(Location::Zone(zone.clone()));
    }
    if config.api.mock {
        return Ok(Location::Zone("MOCK".to_string()));
    }

    let coords = locate_by_ip(api.http_client(), &config.api.geolocation_url)
        .await
        .context("failed to geolocate by IP, pass --zone or --lat/--lon")?;
    Ok(Location::Coordinates(coords))
}

async fn run_check(args: CheckArgs) -> anyhow::Result<u8> {
    let mut config = load_config(&args.common)?;
    if args.use_derivative {
        config.decision.use_derivative = true;
    }
    if let Some(offset) = args.below_mean_offset {
        config.decision.below_mean_offset = offset;
    }
    if let Some(cutoff) = args.delta_cutoff {
        config.decision.delta_cutoff = cutoff;
    }
    config.validate()?;

    let api = CarbonIntensityAPI::new(config.api.provider(), config.api.timeout())?;
    let location = resolve_location(&args.location, &config, &api).await?;

    let history = api
        .fetch_history(&location)
        .await
        .with_context(|| format!("failed to fetch carbon intensity history for {location}"))?;

    let engine = DecisionEngine::new(config.decision.clone(), config.smoothing.clone());
    let eval = engine
        .evaluate(&history)
        .context("failed to evaluate carbon intensity history")?;

    if args.common.verbose {
        print_report(&eval);
    }

    if args.plot {
        plot::write_plot(&args.plot_output, &eval, &config.plot)
            .with_context(|| format!("failed to write plot to {}", args.plot_output.display()))?;
        println!("Plot written to {}", args.plot_output.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&eval.decision)?);
    } else if eval.decision.run_now {
        println!("Run now");
    } else {
        println!("Run later");
    }

    info!("Exiting with run_now={}", eval.decision.run_now);
    Ok(decision_exit_code(eval.decision.run_now))
}

fn print_report(eval: &Evaluation) {
    let d = &eval.decision;
    println!("Current CI = {:.1} g CO2eq/kWh", d.current_ci);
    println!("Average CI (over last 24h) = {:.1} g CO2eq/kWh", d.mean_ci);
    println!(
        "Derivative of current CI = {:.1} g CO2eq/kWh/hour",
        d.trend_slope
    );
    println!(
        "24h range = {:.1} .. {:.1} g CO2eq/kWh (std {:.1}{})",
        d.min_ci,
        d.max_ci,
        d.std_ci,
        if eval.stats.median_substituted {
            ", mean replaced by median"
        } else {
            ""
        }
    );
    println!(
        "Cutoffs: below-mean < {:.1}, near-minimum < {:.1}, falling-fast slope < {:.1}",
        eval.thresholds.below_mean, eval.thresholds.near_minimum, eval.thresholds.falling_fast
    );
    println!("Decided by rule: {}", d.decided_by);
}

async fn run_latest(args: LatestArgs) -> anyhow::Result<()> {
    let config = load_config(&args.common)?;
    config.validate()?;

    let api = CarbonIntensityAPI::new(config.api.provider(), config.api.timeout())?;
    let location = resolve_location(&args.location, &config, &api).await?;

    let latest = api
        .fetch_latest(&location)
        .await
        .with_context(|| format!("failed to fetch latest carbon intensity for {location}"))?;

    println!(
        "{} at {}: {:.1} g CO2eq/kWh",
        latest.zone.as_deref().unwrap_or("unknown zone"),
        latest.timestamp.to_rfc3339(),
        latest.carbon_intensity
    );
    Ok(())
}

async fn run_breakdown(args: LatestArgs) -> anyhow::Result<()> {
    let config = load_config(&args.common)?;
    config.validate()?;

    let api = CarbonIntensityAPI::new(config.api.provider(), config.api.timeout())?;
    let location = resolve_location(&args.location, &config, &api).await?;

    let breakdown = api
        .fetch_power_breakdown(&location)
        .await
        .with_context(|| format!("failed to fetch power breakdown for {location}"))?;

    println!(
        "{} at {}",
        breakdown.zone.as_deref().unwrap_or("unknown zone"),
        breakdown.timestamp.to_rfc3339()
    );
    for (source, mw) in breakdown.ranked_sources() {
        println!("  {source:<12} {mw:>10.0} MW");
    }
    if let Some(total) = breakdown.total_consumption {
        println!("  {:<12} {:>10.0} MW", "total", total);
    }
    if let Some(pct) = breakdown.fossil_free_percentage {
        println!("Fossil free: {pct:.0}%");
    }
    if let Some(pct) = breakdown.renewable_percentage {
        println!("Renewable: {pct:.0}%");
    }
    Ok(())
}
