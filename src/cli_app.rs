//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use pervigil::core::config::Config;
use pervigil::core::errors::PervigilError;
use pervigil::daemon::notifications::{Color, Notification, Notifier, WebhookNotifier};
use pervigil::daemon::scheduler::Daemon;
use pervigil::daemon::signals::SignalHandler;
use pervigil::monitor::cost::CostStateStore;
use pervigil::monitor::log_reader::FileLogReader;
use pervigil::monitor::state::{FileCostStateStore, FileStateStore};
use pervigil::monitor::thermal::StateStore;
use pervigil::platform::system::hostname;
use pervigil::sensors::SensorReader;

/// Pervigil - host thermal, log and spend watchdog.
#[derive(Debug, Parser)]
#[command(
    name = "pervigil",
    author,
    version,
    about = "Pervigil - NIC thermal, log and API cost watchdog",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Emit log records as JSON on stderr.
    #[arg(long, global = true)]
    json_logs: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (warnings and errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the monitoring daemon until SIGTERM/SIGINT.
    Daemon,
    /// Run every enabled check once and exit.
    Check,
    /// Print the temperatures the sensor chain can read right now.
    Sensors(SensorsArgs),
    /// Show persisted monitor state.
    Status,
    /// Send a test notification to the configured webhook.
    Notify,
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct SensorsArgs {
    /// Interface to read; defaults to the configured interfaces.
    #[arg(long, short = 'i', value_name = "IFACE")]
    interface: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration with secrets redacted.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Some checks succeeded and some failed.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<PervigilError> for CliError {
    fn from(err: PervigilError) -> Self {
        match err {
            PervigilError::InvalidConfig { .. }
            | PervigilError::MissingConfig { .. }
            | PervigilError::ConfigParse { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    init_tracing(cli);

    match &cli.command {
        Command::Daemon => run_daemon(cli),
        Command::Check => run_check(cli),
        Command::Sensors(args) => run_sensors(cli, args),
        Command::Status => run_status(cli),
        Command::Notify => run_notify(cli),
        Command::Config(args) => run_config(cli, args),
    }
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if cli.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ──────────────────── daemon / check ────────────────────

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let daemon = Daemon::from_config(&config)?;
    let signals = SignalHandler::new();
    daemon.run(&signals)?;
    Ok(())
}

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let daemon = Daemon::from_config(&config)?;
    let outcomes = daemon.run_once();
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();

    match output_mode(cli) {
        OutputMode::Human => {
            for outcome in &outcomes {
                match &outcome.error {
                    None => println!("  {:<5} ok", outcome.monitor),
                    Some(err) => println!("  {:<5} FAILED: {err}", outcome.monitor),
                }
            }
        }
        OutputMode::Json => {
            let checks: Vec<Value> = outcomes
                .iter()
                .map(|o| {
                    json!({
                        "monitor": o.monitor,
                        "ok": o.is_ok(),
                        "retryable": o.is_retryable(),
                        "error": o.error.as_ref().map(ToString::to_string),
                        "code": o.error.as_ref().map(PervigilError::code),
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "check",
                "checks": checks,
                "failed": failed,
            }))?;
        }
    }

    if failed > 0 {
        return Err(CliError::Partial(format!(
            "{failed} of {} checks failed",
            outcomes.len()
        )));
    }
    Ok(())
}

// ──────────────────── sensors ────────────────────

fn run_sensors(cli: &Cli, args: &SensorsArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let reader = SensorReader::os(Duration::from_secs(config.sensors.command_timeout_secs));
    let interfaces = args
        .interface
        .as_ref()
        .map_or_else(|| config.thermal.interfaces.clone(), |iface| vec![iface.clone()]);

    let snapshot = reader.read_all(&interfaces);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("CPU:");
            if snapshot.cpu.is_empty() {
                println!("  unavailable");
            }
            for reading in &snapshot.cpu {
                println!("  {:<16} {:.1}°C", reading.label, reading.value);
            }
            println!("NIC:");
            for (iface, reading) in &snapshot.nics {
                match reading {
                    Some(r) => println!("  {iface:<16} {:.1}°C", r.value),
                    None => println!("  {iface:<16} unavailable"),
                }
            }
        }
        OutputMode::Json => {
            let cpu: Vec<Value> = snapshot
                .cpu
                .iter()
                .map(|r| json!({"label": r.label, "celsius": r.value}))
                .collect();
            let nic: Vec<Value> = snapshot
                .nics
                .iter()
                .map(|(iface, r)| json!({"interface": iface, "celsius": r.as_ref().map(|r| r.value)}))
                .collect();
            write_json_line(&json!({
                "command": "sensors",
                "cpu": cpu,
                "nic": nic,
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── status ────────────────────

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let nic_store = FileStateStore::new(&config.thermal.state_file);
    let cost_store = FileCostStateStore::new(&config.cost.state_file);
    let nic = nic_store.load()?;
    let cost = cost_store.load()?;
    let log_reader = config
        .log
        .enabled
        .then(|| FileLogReader::new(&config.log.path, &config.log.position_file));

    match output_mode(cli) {
        OutputMode::Human => {
            println!("NIC thermal ({}):", nic_store.path().display());
            println!("  state:         {}", nic.temp_state);
            println!("  speed limited: {}", nic.speed_limited);
            println!("Daily cost ({}):", cost_store.path().display());
            if config.cost.is_enabled() {
                let date = if cost.date.is_empty() { "-" } else { &cost.date };
                println!("  state:         {}", cost.state);
                println!("  date:          {date}");
            } else {
                println!("  disabled (no API key)");
            }
            println!("Log monitor:");
            match &log_reader {
                Some(reader) => println!(
                    "  {} @ byte {}",
                    reader.log_path().display(),
                    reader.position()
                ),
                None => println!("  disabled"),
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "status",
                "nic": {
                    "temp_state": nic.temp_state,
                    "speed_limited": nic.speed_limited,
                    "interfaces": config.thermal.interfaces,
                    "state_file": nic_store.path().to_string_lossy(),
                },
                "cost": {
                    "enabled": config.cost.is_enabled(),
                    "state": cost.state,
                    "date": cost.date,
                    "state_file": cost_store.path().to_string_lossy(),
                },
                "log": {
                    "enabled": log_reader.is_some(),
                    "path": log_reader.as_ref().map(|r| r.log_path().to_string_lossy().into_owned()),
                    "position": log_reader.as_ref().map(FileLogReader::position),
                },
            }))?;
        }
    }
    Ok(())
}

// ──────────────────── notify ────────────────────

fn run_notify(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    config.require_webhook()?;
    let notifier = WebhookNotifier::from_config(&config.notifications)?;
    let host = hostname();
    let notification = Notification::new(
        format!("🔔 Pervigil test notification - {host}"),
        "Webhook delivery is configured correctly.",
        Color::BLUE,
    )
    .with_field("Interfaces", config.thermal.interfaces.join(", "))
    .with_field(
        "Cost Monitor",
        if config.cost.is_enabled() { "enabled" } else { "disabled" },
    );
    notifier.send(&notification)?;

    match output_mode(cli) {
        OutputMode::Human => println!("Test notification delivered."),
        OutputMode::Json => write_json_line(&json!({
            "command": "notify",
            "delivered": true,
            "host": host,
        }))?,
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?.redacted();

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let webhook = config.require_webhook().is_ok();
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.config_file.display());
                        if !webhook {
                            println!("  Note: no webhook URL set; the daemon will refuse to start.");
                        }
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.config_file.to_string_lossy(),
                            "webhook_configured": webhook,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("PERVIGIL_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
