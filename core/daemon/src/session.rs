//! Usage session records and the clock that stamps them.

use chrono::{DateTime, SecondsFormat, Utc};
use sensor_sentry_protocol::SensorKind;
use serde::Serialize;

/// A closed interval of sensor use. Open sessions are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSession {
    pub sensor: SensorKind,
    pub actor: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub ended_at: DateTime<Utc>,
}

impl UsageSession {
    pub fn duration_ms(&self) -> i64 {
        self.ended_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

/// A session as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSession {
    pub id: i64,
    #[serde(flatten)]
    pub session: UsageSession,
    pub duration_ms: i64,
}

impl StoredSession {
    pub fn new(id: i64, session: UsageSession) -> Self {
        let duration_ms = session.duration_ms();
        Self {
            id,
            session,
            duration_ms,
        }
    }
}

/// Millisecond precision with a `Z` suffix so stored values sort as text.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn serialize_timestamp<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_timestamp(value))
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock driven by hand.
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            now: std::sync::Mutex::new(millis_to_time(millis)),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        *self.now.lock().unwrap() = millis_to_time(millis);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
pub fn millis_to_time(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).expect("valid millis")
}
