//! Habit CLI - Command-line interface for the habit engine
//!
//! Commands:
//! - simulate: Generate a seeded synthetic history (or raw events)
//! - aggregate: Bucket raw events into daily records
//! - features: Engineer feature rows from daily records
//! - train: Train all models and print the training report
//! - recommend: Train on a history and recommend for today
//! - config: Print the default engine configuration

use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use habit_engine::aggregator::{DailyAggregator, HealthDataProvider};
use habit_engine::config::{ConfigError, EngineConfig};
use habit_engine::synthetic::{simulate_history, MockHealthProvider, SimulationParams};
use habit_engine::{
    DailyRecord, EngineError, FeatureEngineer, HabitEngine, ENGINE_VERSION, PRODUCER_NAME,
};

/// Habit - behavioral modeling engine for daily habit data
#[derive(Parser)]
#[command(name = "habit")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Adherence, dropout risk and recommendations from daily habit data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a seeded synthetic history
    Simulate {
        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Simulation parameters (JSON); missing fields take defaults
        #[arg(long)]
        params: Option<PathBuf>,

        /// Override the number of simulated days
        #[arg(long)]
        days: Option<usize>,

        /// First simulated date (defaults to `days` before today)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Emit raw provider events instead of daily records
        #[arg(long)]
        events: bool,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Bucket raw events into daily records
    Aggregate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Engineer feature rows from daily records
    Features {
        /// Daily records file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Train all models and print the training report
    Train {
        /// Daily records file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Train on a history, then recommend for today
    Recommend {
        /// Daily records file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Today's step count
        #[arg(long)]
        steps: u32,

        /// Last night's sleep in hours
        #[arg(long)]
        sleep_hours: f64,

        /// Today's exercise in minutes
        #[arg(long, default_value = "0")]
        exercise_minutes: f64,

        /// Today's date (defaults to the day after the last record)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// User identifier echoed in the output
        #[arg(long, default_value = "demo_user")]
        user_id: String,
    },

    /// Print the default engine configuration
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

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

fn run(cli: Cli) -> Result<(), HabitCliError> {
    match cli.command {
        Commands::Simulate {
            output,
            params,
            days,
            start,
            seed,
            events,
            output_format,
        } => cmd_simulate(
            &output,
            params.as_deref(),
            days,
            start,
            seed,
            events,
            &output_format,
        ),

        Commands::Aggregate {
            input,
            output,
            input_format,
            output_format,
        } => cmd_aggregate(&input, &output, &input_format, &output_format),

        Commands::Features {
            input,
            output,
            input_format,
            output_format,
        } => cmd_features(&input, &output, &input_format, &output_format),

        Commands::Train {
            input,
            input_format,
            config,
        } => cmd_train(&input, &input_format, config.as_deref()),

        Commands::Recommend {
            input,
            input_format,
            config,
            steps,
            sleep_hours,
            exercise_minutes,
            date,
            user_id,
        } => {
            let history = read_history(&input, &input_format)?;
            let date = match date.or_else(|| history.last().map(|r| r.date + Duration::days(1))) {
                Some(date) => date,
                None => Utc::now().date_naive(),
            };
            let today = DailyRecord::new(date, steps, exercise_minutes, sleep_hours * 60.0);
            cmd_recommend(history, today, config.as_deref(), &user_id)
        }

        Commands::Config { output } => {
            let config = EngineConfig::default();
            if is_stdio(&output) {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            } else {
                config.save(&output)?;
                Ok(())
            }
        }
    }
}

fn cmd_simulate(
    output: &Path,
    params_path: Option<&Path>,
    days: Option<usize>,
    start: Option<NaiveDate>,
    seed: u64,
    events: bool,
    output_format: &OutputFormat,
) -> Result<(), HabitCliError> {
    let mut params = match params_path {
        Some(path) => serde_json::from_str::<SimulationParams>(&read_input(path)?)?,
        None => SimulationParams::default(),
    };
    if let Some(days) = days {
        params.history_days = days;
    }

    let start = start.unwrap_or_else(|| {
        Utc::now().date_naive() - Duration::days(params.history_days as i64)
    });

    let data = if events {
        let from = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| HabitCliError::InvalidArgument(format!("bad start date {start}")))?
            .and_utc();
        let to = from + Duration::days(params.history_days as i64);
        let events = MockHealthProvider::new(seed).fetch_all_events(from, to)?;
        format_output(&events, output_format)?
    } else {
        let records = simulate_history(&params, start, seed)?;
        format_output(&records, output_format)?
    };

    write_output(output, &data)
}

fn cmd_aggregate(
    input: &Path,
    output: &Path,
    input_format: &InputFormat,
    output_format: &OutputFormat,
) -> Result<(), HabitCliError> {
    let input_data = read_input(input)?;
    let events = match input_format {
        InputFormat::Ndjson => DailyAggregator::parse_ndjson(&input_data)?,
        InputFormat::Json => DailyAggregator::parse_array(&input_data)?,
    };

    if events.is_empty() {
        return Err(HabitCliError::NoRecords);
    }

    let records = DailyAggregator::aggregate(&events)?;
    write_output(output, &format_output(&records, output_format)?)
}

fn cmd_features(
    input: &Path,
    output: &Path,
    input_format: &InputFormat,
    output_format: &OutputFormat,
) -> Result<(), HabitCliError> {
    let history = read_history(input, input_format)?;
    let rows = FeatureEngineer::enhance(&history);
    write_output(output, &format_output(&rows, output_format)?)
}

fn cmd_train(
    input: &Path,
    input_format: &InputFormat,
    config: Option<&Path>,
) -> Result<(), HabitCliError> {
    let history = read_history(input, input_format)?;
    let mut engine = HabitEngine::new(load_config(config)?);
    let report = engine.train(&history)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_recommend(
    history: Vec<DailyRecord>,
    today: DailyRecord,
    config: Option<&Path>,
    user_id: &str,
) -> Result<(), HabitCliError> {
    let mut engine = HabitEngine::new(load_config(config)?);
    engine.train(&history)?;
    let recommendation = engine.recommend(&history, today, user_id)?;

    let output = Envelope {
        producer: PRODUCER_NAME,
        engine_version: ENGINE_VERSION,
        recommendation,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    producer: &'static str,
    engine_version: &'static str,
    #[serde(flatten)]
    recommendation: T,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, HabitCliError> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_input(path: &Path) -> Result<String, HabitCliError> {
    if is_stdio(path) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(path: &Path, data: &str) -> Result<(), HabitCliError> {
    if is_stdio(path) {
        print!("{}", data);
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

fn read_history(path: &Path, format: &InputFormat) -> Result<Vec<DailyRecord>, HabitCliError> {
    let input_data = read_input(path)?;
    let records: Vec<DailyRecord> = match format {
        InputFormat::Json => serde_json::from_str(&input_data)?,
        InputFormat::Ndjson => input_data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    HabitCliError::ParseError(format!("Failed to parse line {}: {}", n + 1, e))
                })
            })
            .collect::<Result<_, _>>()?,
    };

    if records.is_empty() {
        return Err(HabitCliError::NoRecords);
    }
    Ok(records)
}

fn format_output<T: Serialize>(items: &[T], format: &OutputFormat) -> Result<String, HabitCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for item in items {
                lines.push(serde_json::to_string(item)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(items)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(items)?),
    }
}

// Error handling

#[derive(Debug)]
enum HabitCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    Config(ConfigError),
    NoRecords,
    InvalidArgument(String),
    ParseError(String),
}

impl From<io::Error> for HabitCliError {
    fn from(e: io::Error) -> Self {
        HabitCliError::Io(e)
    }
}

impl From<EngineError> for HabitCliError {
    fn from(e: EngineError) -> Self {
        HabitCliError::Engine(e)
    }
}

impl From<serde_json::Error> for HabitCliError {
    fn from(e: serde_json::Error) -> Self {
        HabitCliError::Json(e)
    }
}

impl From<ConfigError> for HabitCliError {
    fn from(e: ConfigError) -> Self {
        HabitCliError::Config(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HabitCliError> for CliError {
    fn from(e: HabitCliError) -> Self {
        match e {
            HabitCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HabitCliError::Engine(e) => {
                let hint = match &e {
                    EngineError::InvalidRecord(_) => "Records need unique dates and non-negative values",
                    EngineError::ParseError(_) | EngineError::JsonError(_) => {
                        "Ensure input matches the raw event schema"
                    }
                    _ => "Check the input history and configuration",
                };
                CliError {
                    code: "ENGINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            HabitCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HabitCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'habit config' for a valid template".to_string()),
            },
            HabitCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            HabitCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
            HabitCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}
