//! Invigil CLI - Command-line interface for the proctoring flag engine
//!
//! Commands:
//! - process: Run telemetry through the engine and emit flags + summaries
//! - validate: Validate telemetry event schema

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use invigil::engine::FlagEngine;
use invigil::policy::EnginePolicy;
use invigil::types::{SessionReport, TelemetryEvent};
use invigil::ENGINE_VERSION;

/// Invigil - Proctoring flag engine for remote assessment telemetry
#[derive(Parser)]
#[command(name = "invigil")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn session telemetry into severity-tagged violation flags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run telemetry through the engine and emit flags + summaries
    Process {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Load tier policy from a JSON file instead of the built-in defaults
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Events per submitted batch
        #[arg(long, default_value = "256")]
        batch_size: usize,

        /// Integrity score to feed the recommendation for every session
        #[arg(long)]
        final_score: Option<f64>,
    },

    /// Validate telemetry event schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one session report per line)
    Ndjson,
    /// JSON array of session reports
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::init();
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

fn run(cli: Cli) -> Result<(), InvigilCliError> {
    match cli.command {
        Commands::Process {
            input,
            output,
            input_format,
            output_format,
            policy,
            batch_size,
            final_score,
        } => cmd_process(
            &input,
            &output,
            input_format,
            output_format,
            policy.as_deref(),
            batch_size,
            final_score,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
    }
}

fn cmd_process(
    input: &PathBuf,
    output: &PathBuf,
    input_format: InputFormat,
    output_format: OutputFormat,
    policy: Option<&std::path::Path>,
    batch_size: usize,
    final_score: Option<f64>,
) -> Result<(), InvigilCliError> {
    if batch_size == 0 {
        return Err(InvigilCliError::BadBatchSize);
    }

    let input_data = read_input(input)?;
    let events = parse_events(&input_data, input_format)?;

    if events.is_empty() {
        return Err(InvigilCliError::NoEvents);
    }

    let engine = match policy {
        Some(path) => {
            let policy_json = fs::read_to_string(path)?;
            FlagEngine::with_policy(EnginePolicy::from_json(&policy_json)?)?
        }
        None => FlagEngine::new(),
    };

    // Feed batches in file order; the engine handles per-event reordering
    for chunk in events.chunks(batch_size) {
        for session_events in split_by_session(chunk) {
            let session_id = session_events[0].session_id.clone();
            engine.submit_batch(&session_id, session_events)?;
        }
    }

    let mut reports: Vec<SessionReport> = Vec::new();
    for session_id in engine.active_sessions()? {
        reports.push(engine.end_session(&session_id, final_score)?);
    }

    let output_data = format_output(&reports, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(
    input: &PathBuf,
    input_format: InputFormat,
    json: bool,
) -> Result<(), InvigilCliError> {
    let input_data = read_input(input)?;
    let events = parse_events(&input_data, input_format)?;

    let errors: Vec<ValidationErrorDetail> = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| {
            event.validate().err().map(|e| ValidationErrorDetail {
                index,
                session_id: event.session_id.clone(),
                signal_type: event.signal_type.as_str().to_string(),
                error: e.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - errors.len(),
        invalid_events: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Event {} (session {}, {}): {}",
                    err.index, err.session_id, err.signal_type, err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(InvigilCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &PathBuf) -> Result<String, InvigilCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_events(data: &str, format: InputFormat) -> Result<Vec<TelemetryEvent>, InvigilCliError> {
    match format {
        InputFormat::Ndjson => data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).map_err(InvigilCliError::from))
            .collect(),
        InputFormat::Json => Ok(serde_json::from_str(data)?),
    }
}

/// Split a chunk into per-session runs, preserving arrival order
fn split_by_session(chunk: &[TelemetryEvent]) -> Vec<Vec<TelemetryEvent>> {
    let mut groups: Vec<Vec<TelemetryEvent>> = Vec::new();
    for event in chunk {
        match groups
            .iter_mut()
            .find(|g| g[0].session_id == event.session_id)
        {
            Some(group) => group.push(event.clone()),
            None => groups.push(vec![event.clone()]),
        }
    }
    groups
}

fn format_output(
    reports: &[SessionReport],
    format: &OutputFormat,
) -> Result<String, InvigilCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for report in reports {
                lines.push(serde_json::to_string(report)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(reports)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(reports)?),
    }
}

// Error types

#[derive(Debug)]
enum InvigilCliError {
    Io(io::Error),
    Engine(invigil::EngineError),
    Json(serde_json::Error),
    NoEvents,
    BadBatchSize,
    ValidationFailed(usize),
}

impl From<io::Error> for InvigilCliError {
    fn from(e: io::Error) -> Self {
        InvigilCliError::Io(e)
    }
}

impl From<invigil::EngineError> for InvigilCliError {
    fn from(e: invigil::EngineError) -> Self {
        InvigilCliError::Engine(e)
    }
}

impl From<serde_json::Error> for InvigilCliError {
    fn from(e: serde_json::Error) -> Self {
        InvigilCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<InvigilCliError> for CliError {
    fn from(e: InvigilCliError) -> Self {
        match e {
            InvigilCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            InvigilCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'invigil validate' on the input for details".to_string()),
            },
            InvigilCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            InvigilCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            InvigilCliError::BadBatchSize => CliError {
                code: "BAD_BATCH_SIZE".to_string(),
                message: "batch_size must be at least 1".to_string(),
                hint: None,
            },
            InvigilCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session_id: String,
    signal_type: String,
    error: String,
}
