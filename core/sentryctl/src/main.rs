//! sentryctl: command-line client for sentryd.
//!
//! Feeds sensor and foreground events to the daemon and reads back status and
//! session history. Every subcommand prints the daemon's JSON response.
//!
//! ## Subcommands
//!
//! - `sensor`: report a sensor becoming active or inactive
//! - `foreground`: report the foreground actor
//! - `sessions` / `session`: query recorded usage sessions
//! - `status`, `health`, `notifications`, `shutdown`: daemon control

mod client;

use clap::{Parser, Subcommand, ValueEnum};
use sensor_sentry_protocol::{Method, Response, SensorKind};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentryctl")]
#[command(about = "Sensor usage monitor client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is up
    Health,

    /// Report a sensor state change
    Sensor {
        /// microphone | camera
        #[arg(value_name = "KIND", value_parser = parse_sensor)]
        kind: SensorKind,

        /// Sensor has at least one active client
        #[arg(long, conflicts_with = "inactive", required_unless_present = "inactive")]
        active: bool,

        /// Sensor has no active clients
        #[arg(long)]
        inactive: bool,

        /// Client identifier for the active recording config
        #[arg(long)]
        client: Option<String>,
    },

    /// Report the actor currently in the foreground
    Foreground {
        #[arg(value_name = "ACTOR")]
        actor: String,
    },

    /// List recorded sessions, newest first
    Sessions {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_parser = parse_sensor)]
        sensor: Option<SensorKind>,
    },

    /// Show one recorded session
    Session {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Show tracker, notification and indicator state
    Status,

    /// Enable or disable usage notifications
    Notifications {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Stop the daemon, flushing open sessions
    Shutdown,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn parse_sensor(value: &str) -> Result<SensorKind, String> {
    SensorKind::parse(&value.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown sensor '{}' (expected microphone or camera)", value))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(response) => report(response),
        Err(err) => {
            tracing::error!(error = %err, "sentryctl failed");
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<Response, String> {
    let socket = client::socket_path()?;

    match command {
        Commands::Health => {
            client::send_request(&socket, &client::request(Method::GetHealth, None))
        }
        Commands::Sensor {
            kind,
            active,
            inactive: _,
            client: client_id,
        } => client::send_event(&socket, client::sensor_event(kind, active, client_id)),
        Commands::Foreground { actor } => {
            client::send_event(&socket, client::foreground_event(&actor))
        }
        Commands::Sessions { limit, sensor } => {
            let params = serde_json::json!({ "limit": limit, "sensor": sensor });
            client::send_request(&socket, &client::request(Method::GetSessions, Some(params)))
        }
        Commands::Session { id } => client::send_request(
            &socket,
            &client::request(Method::GetSession, Some(serde_json::json!({ "id": id }))),
        ),
        Commands::Status => {
            client::send_request(&socket, &client::request(Method::GetStatus, None))
        }
        Commands::Notifications { state } => {
            let enabled = matches!(state, Toggle::On);
            client::send_request(
                &socket,
                &client::request(
                    Method::SetPreferences,
                    Some(serde_json::json!({ "notifications_enabled": enabled })),
                ),
            )
        }
        Commands::Shutdown => {
            client::send_request(&socket, &client::request(Method::Shutdown, None))
        }
    }
}

fn report(response: Response) -> ExitCode {
    if response.ok {
        let data = response.data.unwrap_or(serde_json::Value::Null);
        match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", data),
        }
        ExitCode::SUCCESS
    } else {
        match response.error {
            Some(err) => eprintln!("error: {}: {}", err.code, err.message),
            None => eprintln!("error: daemon returned an unknown error"),
        }
        ExitCode::FAILURE
    }
}
