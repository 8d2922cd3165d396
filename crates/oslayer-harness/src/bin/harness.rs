//! CLI entrypoint for the oslayer scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use oslayer_harness::structured_log::validate_log_file;
use oslayer_harness::{LogEmitter, Scenario, ScenarioOptions, scenarios};

/// Lifecycle scenarios for the oslayer entity pool.
#[derive(Debug, Parser)]
#[command(name = "oslayer-harness")]
#[command(about = "Scenario harness for the oslayer entity lifecycle")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scenario and print its report as JSON.
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
        /// Root seed for randomized scenarios.
        #[arg(long, default_value_t = ScenarioOptions::default().seed)]
        seed: u64,
        /// Iterations for looping scenarios.
        #[arg(long, default_value_t = ScenarioOptions::default().iterations)]
        iterations: u32,
        /// Entity pool capacity for the scenario's private pool.
        #[arg(long, default_value_t = ScenarioOptions::default().capacity)]
        capacity: usize,
        /// Structured JSONL log path (stderr if omitted).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Run identifier stamped into every trace id.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// List scenario names.
    List,
    /// Validate a structured JSONL log produced by `run`.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scenario,
            seed,
            iterations,
            capacity,
            log,
            run_id,
        } => {
            let run_id = run_id.unwrap_or_else(|| format!("pid{}", std::process::id()));
            let mut emitter = match &log {
                Some(path) => LogEmitter::to_file(path, "harness", &run_id)?,
                None => LogEmitter::to_stderr("harness", &run_id),
            };
            let options = ScenarioOptions {
                seed,
                iterations,
                capacity,
            };
            if scenario.terminates_process() {
                eprintln!("{scenario}: expected to terminate the process");
            }
            let report = scenarios::run(scenario, &options, &mut emitter)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List => {
            for scenario in Scenario::ALL {
                let note = if scenario.terminates_process() {
                    " (terminates process)"
                } else {
                    ""
                };
                println!("{}{note}", scenario.name());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for error in &errors {
                eprintln!("{error}");
            }
            if !errors.is_empty() {
                return Err(format!(
                    "{} invalid entries in {} lines of {}",
                    errors.len(),
                    lines,
                    log.display()
                )
                .into());
            }
            println!("{lines} entries valid");
        }
    }

    Ok(())
}
