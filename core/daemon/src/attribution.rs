//! Tracks which actor (foreground app/process) is deemed responsible for
//! sensor activity. Fed by foreground-change events; read at session close.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributionSnapshot {
    pub actor: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct AttributionTracker {
    current: Mutex<AttributionSnapshot>,
}

impl AttributionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, actor: &str, at: DateTime<Utc>) {
        let actor = actor.trim();
        if actor.is_empty() {
            return;
        }
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.actor.as_deref() != Some(actor) {
            current.actor = Some(actor.to_string());
            current.changed_at = Some(at);
        }
    }

    pub fn current_actor(&self) -> Option<String> {
        self.snapshot().actor
    }

    pub fn snapshot(&self) -> AttributionSnapshot {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::millis_to_time;

    #[test]
    fn keeps_latest_actor() {
        let tracker = AttributionTracker::new();
        assert_eq!(tracker.current_actor(), None);

        tracker.record("com.a", millis_to_time(1));
        tracker.record("com.b", millis_to_time(2));
        assert_eq!(tracker.current_actor().as_deref(), Some("com.b"));
    }

    #[test]
    fn repeated_actor_keeps_first_change_time() {
        let tracker = AttributionTracker::new();
        tracker.record("com.a", millis_to_time(1));
        tracker.record("com.a", millis_to_time(5));
        assert_eq!(tracker.snapshot().changed_at, Some(millis_to_time(1)));
    }

    #[test]
    fn ignores_blank_actor() {
        let tracker = AttributionTracker::new();
        tracker.record("com.a", millis_to_time(1));
        tracker.record("   ", millis_to_time(2));
        assert_eq!(tracker.current_actor().as_deref(), Some("com.a"));
    }
}
