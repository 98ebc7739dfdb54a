//! sentryd entrypoint.
//!
//! A small, single-writer service that tracks sensor usage sessions: a socket
//! listener with strict request validation feeding per-sensor state machines,
//! and a SQLite store for closed sessions.

use clap::Parser;
use fs_err as fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use sensor_sentry_protocol::{
    parse_event, parse_preferences, parse_session_lookup, parse_sessions_query, ErrorInfo,
    Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod attribution;
mod config;
mod db;
mod error;
mod hub;
mod indicator;
mod logging;
mod notifications;
mod session;
mod state;
mod tracker;
mod writer;

use config::SentryConfig;
use db::Db;
use notifications::FilePreferences;
use session::SystemClock;
use state::SharedState;

const SOCKET_NAME: &str = "sentryd.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "sentryd")]
#[command(about = "Sensor usage monitoring daemon")]
#[command(version)]
struct Args {
    /// Path to config.toml (defaults to ~/.sensor-sentry/config.toml)
    #[arg(long, env = "SENSOR_SENTRY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let data_dir = config::data_dir();
    let (config, config_error) = match config::load_config(args.config) {
        Ok(config) => (config, None),
        Err(err) => (SentryConfig::default(), Some(err)),
    };

    let log_dir = match (&data_dir, config.logging.file) {
        (Ok(dir), true) => Some(dir.join("logs")),
        _ => None,
    };
    let _logging_guard = logging::init(log_dir.as_deref());

    if let Some(err) = config_error {
        warn!(error = %err, "Failed to load config; using defaults");
    }

    let data_dir = match data_dir {
        Ok(dir) => dir,
        Err(err) => {
            error!(error = %err, "Failed to resolve data directory");
            std::process::exit(1);
        }
    };

    let socket_path = data_dir.join(SOCKET_NAME);
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = config
        .storage
        .db_path
        .clone()
        .unwrap_or_else(|| data_dir.join("sentryd").join("sessions.db"));
    let db = match Db::new(db_path) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize session database");
            std::process::exit(1);
        }
    };

    let preferences = Arc::new(FilePreferences::new(data_dir.join("preferences.json")));
    let shared_state = match SharedState::new(&config, db, preferences, Arc::new(SystemClock)) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(error = %err, "Failed to start session writer");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    shared_state.start();
    info!(path = %socket_path.display(), "sentryd started");

    let socket_path = Arc::new(socket_path);
    for stream in listener.incoming() {
        if shared_state.is_stopped() {
            break;
        }
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                let socket = Arc::clone(&socket_path);
                thread::spawn(move || handle_connection(stream, state, &socket));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }

    shared_state.stop();
    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove daemon socket on exit");
    }
    info!("sentryd exited");
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>, socket_path: &Path) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let is_shutdown = matches!(request.method, Method::Shutdown);
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);

    if is_shutdown && state.is_stopped() {
        // Wake the accept loop so it notices the stop flag.
        let _ = UnixStream::connect(socket_path);
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let status = if state.is_stopped() { "stopping" } else { "ok" };
            Response::ok(
                request.id,
                serde_json::json!({
                    "status": status,
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                }),
            )
        }
        Method::Event => handle_event(request, state),
        Method::GetSessions => {
            let query = match parse_sessions_query(request.params) {
                Ok(query) => query,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match state.sessions_snapshot(&query) {
                Ok(sessions) => {
                    tracing::debug!(sessions = sessions.len(), "Sessions snapshot");
                    to_response(request.id, &sessions, "sessions")
                }
                Err(err) => Response::error(
                    request.id,
                    "sessions_error",
                    format!("Failed to fetch sessions: {}", err),
                ),
            }
        }
        Method::GetSession => {
            let lookup = match parse_session_lookup(request.params) {
                Ok(lookup) => lookup,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match state.session_snapshot(lookup.id) {
                Ok(Some(session)) => to_response(request.id, &session, "session"),
                Ok(None) => Response::error(
                    request.id,
                    "not_found",
                    format!("session {} not found", lookup.id),
                ),
                Err(err) => Response::error(
                    request.id,
                    "sessions_error",
                    format!("Failed to fetch session: {}", err),
                ),
            }
        }
        Method::GetStatus => to_response(request.id, &state.status_snapshot(), "status"),
        Method::SetPreferences => {
            let update = match parse_preferences(request.params) {
                Ok(update) => update,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match state.set_notifications_enabled(update.notifications_enabled) {
                Ok(()) => Response::ok(
                    request.id,
                    serde_json::json!({ "notifications_enabled": update.notifications_enabled }),
                ),
                Err(err) => Response::error(request.id, "preferences_error", err),
            }
        }
        Method::Shutdown => {
            let summary = state.stop();
            info!(
                flushed = summary.flushed,
                discarded = summary.discarded,
                "Shutdown requested"
            );
            to_response(request.id, &summary, "shutdown summary")
        }
    }
}

fn handle_event(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };

    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event_type = ?event.event_type,
        sensor = ?event.sensor,
        configs = event.configs().len(),
        actor = ?event.actor,
        "Received event"
    );

    let delivered = state.update_from_event(&event);

    Response::ok(
        request.id,
        serde_json::json!({"accepted": true, "delivered": delivered}),
    )
}

fn to_response<T: serde::Serialize>(id: Option<String>, value: &T, label: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", label, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
