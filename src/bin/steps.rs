//! Steps CLI - Command-line interface for the step-series engine
//!
//! Commands:
//! - summary: Walking/running totals for one day of a recording
//! - series: Cumulative trend buckets for one day of a recording
//! - watch: Play a recording through the engine with live polling
//! - validate: Check a recording's ordering and counter resets
//! - doctor: Diagnose configuration and environment

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use step_series::source::RecordingReport;
use step_series::{
    Bucket, Clock, EngineConfig, ManualClock, RecordedSource, RecordingAdapter, SensorError,
    SeriesStrategy, StepSnapshot, StepsEngine, StepsError, SystemClock, VERSION,
};

/// Steps - step counter aggregation engine
#[derive(Parser)]
#[command(name = "steps")]
#[command(version = VERSION)]
#[command(about = "Aggregate step counter readings into daily summaries and trend series", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PlaybackArgs {
    /// Recording file, NDJSON or JSON array (use - for stdin)
    #[arg(short, long)]
    recording: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shift the recording so its first reading lands at this RFC 3339 time
    #[arg(long, value_parser = parse_time)]
    replay_from: Option<DateTime<Utc>>,

    /// Pin the current time (RFC 3339); defaults to the system clock
    #[arg(long, value_parser = parse_time)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walking/running totals for one day
    Summary {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Days into the past (0 = today)
        #[arg(long, default_value = "0")]
        day_offset: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cumulative trend buckets for one day
    Series {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Days into the past (0 = today)
        #[arg(long, default_value = "0")]
        day_offset: u32,

        /// Bucket width in minutes (must divide 1440)
        #[arg(long)]
        resolution: Option<u32>,

        /// How buckets are populated
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Run the engine with its poller and print each published model.
    /// Without --replay-from the recording starts 12 hours before now.
    Watch {
        #[command(flatten)]
        playback: PlaybackArgs,

        /// Seconds between polls
        #[arg(long, default_value = "5")]
        interval: u64,

        /// Stop after this many published models
        #[arg(long)]
        ticks: Option<usize>,
    },

    /// Check a recording's ordering and counter resets
    Validate {
        /// Recording file (use - for stdin)
        #[arg(short, long)]
        recording: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check an engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// One history query per bucket
    PerInterval,
    /// One merged query for the whole day
    DayStream,
}

impl From<StrategyArg> for SeriesStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::PerInterval => SeriesStrategy::PerInterval,
            StrategyArg::DayStream => SeriesStrategy::DayStream,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one bucket per line)
    Ndjson,
    /// JSON array of buckets
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), StepsCliError> {
    match cli.command {
        Commands::Summary {
            playback,
            day_offset,
            json,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_summary(&playback, day_offset, json))
        }

        Commands::Series {
            playback,
            day_offset,
            resolution,
            strategy,
            output_format,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_series(
                &playback,
                day_offset,
                resolution,
                strategy,
                output_format,
            ))
        }

        Commands::Watch {
            playback,
            interval,
            ticks,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_watch(&playback, interval, ticks))
        }

        Commands::Validate { recording, json } => cmd_validate(&recording, json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

async fn cmd_summary(
    playback: &PlaybackArgs,
    day_offset: u32,
    json: bool,
) -> Result<(), StepsCliError> {
    let config = load_config(playback.config.as_deref(), |c| c.poll_interval_secs = 0)?;
    let engine = open_engine(playback, config, None)?;

    engine.activate().await?;
    let day = engine.change_day(day_offset as i32).await?;
    let summary = engine.current_day_summary().await?;
    let date = engine.model().date;
    engine.deactivate().await;

    if json {
        let output = serde_json::json!({
            "date": date,
            "day": day,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let counts = summary.value();
        println!("Step Summary");
        println!("============");
        println!("Date:     {} (offset {})", date, day.day_offset);
        println!("Walking:  {}", counts.walking);
        println!("Running:  {}", counts.running);
        println!("Unknown:  {}", counts.unknown);
        println!("Total:    {}", counts.total());
    }

    match summary.error() {
        Some(err) => Err(StepsCliError::Sensor(err.clone())),
        None => Ok(()),
    }
}

async fn cmd_series(
    playback: &PlaybackArgs,
    day_offset: u32,
    resolution: Option<u32>,
    strategy: Option<StrategyArg>,
    output_format: OutputFormat,
) -> Result<(), StepsCliError> {
    let config = load_config(playback.config.as_deref(), |c| {
        c.poll_interval_secs = 0;
        if let Some(strategy) = strategy {
            c.series_strategy = strategy.into();
        }
    })?;
    let resolution = resolution.unwrap_or(config.resolution_minutes);
    let engine = open_engine(playback, config, None)?;

    engine.activate().await?;
    engine.change_day(day_offset as i32).await?;
    let series = engine.current_day_series(resolution).await?;
    engine.deactivate().await;

    print!("{}", format_output(series.value(), &output_format)?);

    match series.error() {
        Some(err) => Err(StepsCliError::Sensor(err.clone())),
        None => Ok(()),
    }
}

async fn cmd_watch(
    playback: &PlaybackArgs,
    interval: u64,
    ticks: Option<usize>,
) -> Result<(), StepsCliError> {
    let config = load_config(playback.config.as_deref(), |c| c.poll_interval_secs = interval)?;
    let default_start = playback.now.unwrap_or_else(Utc::now) - Duration::hours(12);
    let engine = open_engine(playback, config, Some(default_start))?;
    let mut models = engine.subscribe();

    let first = engine.activate().await?;
    println!("{}", serde_json::to_string(&first)?);
    let _ = models.borrow_and_update();

    let mut printed = 1;
    while ticks.map_or(true, |limit| printed < limit) {
        tokio::select! {
            changed = models.changed() => {
                if changed.is_err() {
                    break;
                }
                let model = models.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&model)?);
                printed += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    engine.deactivate().await;
    Ok(())
}

fn cmd_validate(recording: &Path, json: bool) -> Result<(), StepsCliError> {
    let snapshots = read_recording(recording)?;
    let report = RecordingAdapter::validate(&snapshots);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_validation(&report);
    }

    if report.total == 0 {
        Err(StepsCliError::NoReadings)
    } else if !report.is_ordered() {
        Err(StepsCliError::ValidationFailed(report.out_of_order.len()))
    } else {
        Ok(())
    }
}

fn print_validation(report: &RecordingReport) {
    println!("Validation Report");
    println!("=================");
    println!("Total readings:   {}", report.total);
    println!("Out of order:     {}", report.out_of_order.len());
    println!("Counter resets:   {}", report.resets.len());
    if let (Some(first), Some(last)) = (report.first, report.last) {
        println!("Span:             {} .. {}", first, last);
    }

    if !report.out_of_order.is_empty() {
        println!("\nOut-of-order readings:");
        for index in &report.out_of_order {
            println!("  - index {}", index);
        }
    }
    if !report.resets.is_empty() {
        println!("\nSession resets (counter went backwards):");
        for index in &report.resets {
            println!("  - index {}", index);
        }
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), StepsCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("step-series version {}", VERSION),
    });

    match config {
        Some(path) if path.exists() => match EngineConfig::from_file(path) {
            Ok(config) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid ({} min buckets, {} strategy, poll every {}s)",
                    config.resolution_minutes,
                    config.series_strategy.as_str(),
                    config.poll_interval_secs
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            }),
        },
        Some(_) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist".to_string(),
        }),
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using default configuration".to_string(),
        }),
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info (default)".to_string());
    checks.push(DoctorCheck {
        name: "log_filter".to_string(),
        status: CheckStatus::Ok,
        message: format!("Log filter: {}", log_filter),
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass recordings by path)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--recording - is available)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Steps Doctor Report");
        println!("===================");
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StepsCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 time: {}", e))
}

fn read_recording(path: &Path) -> Result<Vec<StepSnapshot>, StepsCliError> {
    let input_data = if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(path)?
    };
    Ok(RecordingAdapter::parse(&input_data)?)
}

fn load_config(
    path: Option<&Path>,
    overrides: impl FnOnce(&mut EngineConfig),
) -> Result<EngineConfig, StepsCliError> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn open_engine(
    playback: &PlaybackArgs,
    config: EngineConfig,
    default_start: Option<DateTime<Utc>>,
) -> Result<StepsEngine, StepsCliError> {
    let snapshots = read_recording(&playback.recording)?;
    if snapshots.is_empty() {
        return Err(StepsCliError::NoReadings);
    }

    let clock: Arc<dyn Clock> = match playback.now {
        Some(now) => Arc::new(ManualClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let mut source = RecordedSource::new(snapshots, Arc::clone(&clock));
    if let Some(start) = playback.replay_from.or(default_start) {
        source = source.replay_from(start);
    }
    tracing::debug!(readings = source.snapshots().len(), "recording loaded");

    Ok(StepsEngine::new(Arc::new(source), clock, config)?)
}

fn format_output(buckets: &[Bucket], format: &OutputFormat) -> Result<String, StepsCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut output = String::new();
            for bucket in buckets {
                output.push_str(&serde_json::to_string(bucket)?);
                output.push('\n');
            }
            Ok(output)
        }
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string(buckets)?)),
        OutputFormat::JsonPretty => Ok(format!("{}\n", serde_json::to_string_pretty(buckets)?)),
    }
}

// Error types

#[derive(Debug)]
enum StepsCliError {
    Io(io::Error),
    Steps(StepsError),
    Json(serde_json::Error),
    Sensor(SensorError),
    NoReadings,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for StepsCliError {
    fn from(e: io::Error) -> Self {
        StepsCliError::Io(e)
    }
}

impl From<StepsError> for StepsCliError {
    fn from(e: StepsError) -> Self {
        StepsCliError::Steps(e)
    }
}

impl From<serde_json::Error> for StepsCliError {
    fn from(e: serde_json::Error) -> Self {
        StepsCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StepsCliError> for CliError {
    fn from(e: StepsCliError) -> Self {
        match e {
            StepsCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StepsCliError::Steps(StepsError::Sensor(e)) | StepsCliError::Sensor(e) => {
                sensor_error(e)
            }
            StepsCliError::Steps(e @ StepsError::ParseError(_)) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Each reading needs timestamp (RFC 3339), walking and running".to_string(),
                ),
            },
            StepsCliError::Steps(e @ StepsError::InvalidResolution(_)) => CliError {
                code: "INVALID_RESOLUTION".to_string(),
                message: e.to_string(),
                hint: Some("Use a divisor of 1440 such as 5, 15, 30 or 60".to_string()),
            },
            StepsCliError::Steps(e @ StepsError::InvalidConfig(_)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: e.to_string(),
                hint: Some("Run 'steps doctor --config FILE' for details".to_string()),
            },
            StepsCliError::Steps(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            StepsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StepsCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in recording".to_string(),
                hint: Some("Ensure the recording file is not empty".to_string()),
            },
            StepsCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} readings are out of order", count),
                hint: Some("Sort the recording by timestamp".to_string()),
            },
            StepsCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the check output above".to_string()),
            },
        }
    }
}

fn sensor_error(e: SensorError) -> CliError {
    let hint = match e.kind() {
        step_series::SensorErrorKind::Unsupported => "This device has no step counter",
        step_series::SensorErrorKind::CapabilityDisabled => {
            "Enable motion data access in system settings"
        }
        step_series::SensorErrorKind::SensorDeactivated => "The sensor session ended; retry",
        step_series::SensorErrorKind::Unknown => "Retry with --verbose for details",
    };
    CliError {
        code: format!("SENSOR_{}", e.kind().as_str().to_uppercase()),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
