//! Socket client for sentryd.
//!
//! One request per connection, newline-terminated JSON both ways. Events are
//! retried once with the same event id; the daemon treats repeated sensor
//! state as a no-op.

use chrono::Utc;
use rand::RngCore;
use sensor_sentry_protocol::{
    EventEnvelope, EventType, Method, RecordingConfig, Request, Response, SensorKind,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SOCKET_ENV: &str = "SENSOR_SENTRY_SOCKET";
const DATA_DIR_NAME: &str = ".sensor-sentry";
const SOCKET_NAME: &str = "sentryd.sock";
const READ_TIMEOUT_MS: u64 = 3000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

pub fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DATA_DIR_NAME).join(SOCKET_NAME))
}

pub fn request(method: Method, params: Option<serde_json::Value>) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params,
    }
}

pub fn sensor_event(sensor: SensorKind, active: bool, client_id: Option<String>) -> EventEnvelope {
    let configs = if active {
        vec![RecordingConfig {
            client_id,
            source: Some(sensor.as_str().to_string()),
        }]
    } else {
        Vec::new()
    };

    EventEnvelope {
        event_id: make_event_id(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type: EventType::SensorConfigChanged,
        sensor: Some(sensor),
        configs: Some(configs),
        actor: None,
    }
}

pub fn foreground_event(actor: &str) -> EventEnvelope {
    EventEnvelope {
        event_id: make_event_id(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type: EventType::ForegroundActorChanged,
        sensor: None,
        configs: None,
        actor: Some(actor.to_string()),
    }
}

pub fn send_event(socket: &Path, event: EventEnvelope) -> Result<Response, String> {
    let params = serde_json::to_value(&event)
        .map_err(|err| format!("Failed to serialize event: {}", err))?;
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::Event,
        id: Some(event.event_id.clone()),
        params: Some(params),
    };

    match send_request(socket, &request) {
        Ok(response) => Ok(response),
        Err(err) => {
            tracing::warn!(
                error = %err,
                event_id = %event.event_id,
                "Failed to send event to daemon"
            );
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(socket, &request).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    event_id = %event.event_id,
                    "Retry failed sending event to daemon"
                );
                retry_err
            })
        }
    }
}

pub fn send_request(socket: &Path, request: &Request) -> Result<Response, String> {
    let mut stream = UnixStream::connect(socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_event_id() -> String {
    let rand = rand::thread_rng().next_u64();
    format!(
        "evt-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}

fn make_request_id() -> String {
    format!("req-{:x}", rand::thread_rng().next_u64())
}
