use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use resilix::config::ResilienceConfig;
use resilix::error::{ErrorClassifier, RawFailure, TransportFailure};
use resilix::logging::{init_logging, LogLevel};
use resilix::network::{probe_with_timeout, HttpProbe};

#[derive(Parser, Debug)]
#[command(name = "resilix")]
#[command(version)]
#[command(about = "Inspect failure classification, retry backoff and reachability")]
struct Cli {
    /// Configuration file (TOML). Environment overrides use RESILIX__<SECTION>__<KEY>
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Suppress log output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a raw failure and print the resulting error details as JSON
    Classify {
        /// Raw failure as JSON, e.g. '{"type":"transport","data":{"status":503}}'.
        /// Reads stdin when omitted or "-"
        input: Option<String>,

        /// Build a transport failure with this HTTP status instead of reading JSON
        #[arg(long, conflicts_with = "input")]
        status: Option<u16>,

        /// Message for --status
        #[arg(long, requires = "status", default_value = "")]
        message: String,

        /// Application error code for --status
        #[arg(long, requires = "status")]
        code: Option<String>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the un-jittered backoff schedule in milliseconds
    Backoff {
        /// Override retry.max_attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Probe endpoints for reachability, concurrently
    Probe {
        /// Endpoints to probe; defaults to probe.endpoint from the configuration
        endpoints: Vec<String>,

        /// Override probe.timeout_ms
        #[arg(long, value_name = "MILLISECONDS")]
        timeout_ms: Option<u64>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Serialize)]
struct ProbeReport {
    endpoint: String,
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let mut logging = config.logging_config().with_timestamps(false);
    if cli.quiet {
        logging = logging.with_level(LogLevel::Off);
    } else if cli.verbose > 0 {
        logging = logging.with_level(LogLevel::from(cli.verbose));
    }
    init_logging(&logging);

    let result = match cli.command {
        Commands::Classify {
            input,
            status,
            message,
            code,
            pretty,
        } => run_classify(input, status, message, code, pretty),
        Commands::Backoff { max_attempts } => run_backoff(&config, max_attempts),
        Commands::Probe {
            endpoints,
            timeout_ms,
        } => run_probe(&config, endpoints, timeout_ms).await,
        Commands::Config => run_config(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

fn load_config(path: Option<&PathBuf>) -> Result<ResilienceConfig, resilix::config::ConfigError> {
    match path {
        Some(path) => ResilienceConfig::load(path),
        None => ResilienceConfig::from_env(),
    }
}

fn run_classify(
    input: Option<String>,
    status: Option<u16>,
    message: String,
    code: Option<String>,
    pretty: bool,
) -> CliResult {
    let raw = match status {
        Some(status) => {
            let mut failure = TransportFailure::new(Some(status), message);
            if let Some(code) = code {
                failure = failure.with_code(code);
            }
            RawFailure::Transport(failure)
        }
        None => {
            let text = match input.as_deref() {
                None | Some("-") => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
                Some(text) => text.to_string(),
            };
            serde_json::from_str::<RawFailure>(text.trim())
                .map_err(|e| format!("invalid raw failure JSON: {}", e))?
        }
    };

    let details = ErrorClassifier::new().classify(&raw);
    print_json(&details, pretty)?;
    Ok(ExitCode::SUCCESS)
}

fn run_backoff(config: &ResilienceConfig, max_attempts: Option<u32>) -> CliResult {
    let mut options = config.retry_options();
    if let Some(max_attempts) = max_attempts {
        options = options.with_max_attempts(max_attempts);
    }

    let schedule: Vec<u64> = options
        .backoff_schedule()
        .into_iter()
        .map(|delay| delay.as_millis() as u64)
        .collect();
    print_json(&schedule, false)?;
    Ok(ExitCode::SUCCESS)
}

fn run_config(config: &ResilienceConfig) -> CliResult {
    print_json(config, true)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_probe(
    config: &ResilienceConfig,
    mut endpoints: Vec<String>,
    timeout_ms: Option<u64>,
) -> CliResult {
    if endpoints.is_empty() {
        match &config.probe.endpoint {
            Some(endpoint) => endpoints.push(endpoint.clone()),
            None => return Err("no endpoint given and probe.endpoint is not configured".into()),
        }
    }

    let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.probe.timeout_ms));
    let reports = futures::future::join_all(
        endpoints
            .into_iter()
            .map(|endpoint| probe_endpoint(endpoint, timeout)),
    )
    .await;

    let all_reachable = reports.iter().all(|report| report.reachable);
    print_json(&reports, true)?;
    Ok(if all_reachable {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn probe_endpoint(endpoint: String, timeout: Duration) -> ProbeReport {
    let result = match HttpProbe::new(endpoint.clone(), timeout) {
        Ok(probe) => probe_with_timeout(&probe, timeout).await,
        Err(e) => Err(e),
    };
    ProbeReport {
        endpoint,
        reachable: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<(), serde_json::Error> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}
