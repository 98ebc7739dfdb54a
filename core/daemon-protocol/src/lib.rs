//! IPC protocol types and validation for sentryd.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SESSIONS_LIMIT: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetSessions,
    GetSession,
    GetStatus,
    SetPreferences,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Hardware input whose usage the daemon tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Microphone,
    Camera,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Microphone, SensorKind::Camera];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Microphone => "microphone",
            SensorKind::Camera => "camera",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "microphone" | "mic" => Some(SensorKind::Microphone),
            "camera" | "cam" => Some(SensorKind::Camera),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active recording configuration reported by the hardware source.
/// Only the presence of configurations matters to session tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum EventType {
    SensorConfigChanged,
    ForegroundActorChanged,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub event_id: String,
    pub recorded_at: String,
    pub event_type: EventType,
    #[serde(default)]
    pub sensor: Option<SensorKind>,
    /// Absent and empty both mean "sensor inactive".
    #[serde(default)]
    pub configs: Option<Vec<RecordingConfig>>,
    #[serde(default)]
    pub actor: Option<String>,
}

impl EventEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        match self.event_type {
            EventType::SensorConfigChanged => {
                if self.sensor.is_none() {
                    return Err(ErrorInfo::new("missing_field", "sensor is required"));
                }
            }
            EventType::ForegroundActorChanged => {
                require_string(&self.actor, "actor")?;
            }
        }

        Ok(())
    }

    pub fn configs(&self) -> &[RecordingConfig] {
        self.configs.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sensor: Option<SensorKind>,
}

impl SessionsQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(100).min(MAX_SESSIONS_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionLookup {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreferencesUpdate {
    pub notifications_enabled: bool,
}

pub fn parse_event(params: Value) -> Result<EventEnvelope, ErrorInfo> {
    let envelope: EventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn parse_sessions_query(params: Option<Value>) -> Result<SessionsQuery, ErrorInfo> {
    match params {
        None | Some(Value::Null) => Ok(SessionsQuery::default()),
        Some(value) => serde_json::from_value(value).map_err(|err| {
            ErrorInfo::new(
                "invalid_params",
                format!("sessions query is invalid: {}", err),
            )
        }),
    }
}

pub fn parse_session_lookup(params: Option<Value>) -> Result<SessionLookup, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "id is required"))?;
    let lookup: SessionLookup = serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("id is invalid: {}", err)))?;
    if lookup.id <= 0 {
        return Err(ErrorInfo::new("invalid_params", "id must be positive"));
    }
    Ok(lookup)
}

pub fn parse_preferences(params: Option<Value>) -> Result<PreferencesUpdate, ErrorInfo> {
    let params = params.ok_or_else(|| {
        ErrorInfo::new("invalid_params", "notifications_enabled is required")
    })?;
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("preferences payload is invalid: {}", err),
        )
    })
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_event(event_type: EventType) -> EventEnvelope {
        EventEnvelope {
            event_id: "evt-1".to_string(),
            recorded_at: "2026-01-30T12:00:00Z".to_string(),
            event_type,
            sensor: Some(SensorKind::Microphone),
            configs: Some(vec![RecordingConfig::default()]),
            actor: Some("com.example.recorder".to_string()),
        }
    }

    #[test]
    fn validates_sensor_event() {
        let event = base_event(EventType::SensorConfigChanged);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn sensor_event_requires_sensor() {
        let mut event = base_event(EventType::SensorConfigChanged);
        event.sensor = None;
        assert!(event.validate().is_err());
    }

    #[test]
    fn sensor_event_allows_missing_configs() {
        let mut event = base_event(EventType::SensorConfigChanged);
        event.configs = None;
        assert!(event.validate().is_ok());
        assert!(event.configs().is_empty());
    }

    #[test]
    fn foreground_event_requires_actor() {
        let mut event = base_event(EventType::ForegroundActorChanged);
        event.actor = Some("   ".to_string());
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut event = base_event(EventType::SensorConfigChanged);
        event.recorded_at = "not-a-time".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_long_event_id() {
        let mut event = base_event(EventType::SensorConfigChanged);
        event.event_id = "a".repeat(256);
        assert!(event.validate().is_err());
    }

    #[test]
    fn parse_event_rejects_unknown_fields() {
        let payload = serde_json::json!({
            "event_id": "evt-1",
            "recorded_at": "2026-01-30T12:00:00Z",
            "event_type": "sensor_config_changed",
            "sensor": "camera",
            "bogus": true
        });
        let err = parse_event(payload).expect_err("unknown field rejected");
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn sessions_query_caps_limit() {
        let query = parse_sessions_query(Some(serde_json::json!({"limit": 50_000})))
            .expect("query parses");
        assert_eq!(query.effective_limit(), MAX_SESSIONS_LIMIT);
        assert_eq!(
            parse_sessions_query(None).expect("default").effective_limit(),
            100
        );
    }

    #[test]
    fn session_lookup_requires_positive_id() {
        assert!(parse_session_lookup(Some(serde_json::json!({"id": 0}))).is_err());
        assert!(parse_session_lookup(None).is_err());
        assert_eq!(
            parse_session_lookup(Some(serde_json::json!({"id": 7})))
                .expect("lookup")
                .id,
            7
        );
    }

    #[test]
    fn sensor_kind_accepts_short_names() {
        assert_eq!(SensorKind::parse("mic"), Some(SensorKind::Microphone));
        assert_eq!(SensorKind::parse("camera"), Some(SensorKind::Camera));
        assert_eq!(SensorKind::parse("speaker"), None);
    }
}
