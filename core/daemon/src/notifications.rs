//! "Sensor in use" notifications.
//!
//! One reserved notification ID per sensor kind. Showing is gated on the user
//! preference, read fresh on every attempt; hiding is always allowed.

use fs_err as fs;
use sensor_sentry_protocol::SensorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::NotificationsConfig;

pub trait PreferenceStore: Send + Sync {
    fn notifications_enabled(&self) -> bool;
}

pub trait NotificationPresenter: Send + Sync {
    fn show(&self, id: u32, sensor: SensorKind);
    fn cancel(&self, id: u32);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferencesFile {
    #[serde(default = "default_notifications_enabled")]
    notifications_enabled: bool,
}

fn default_notifications_enabled() -> bool {
    true
}

/// Preferences persisted as JSON and re-read on every query, so edits made
/// while the daemon runs apply to the next activation.
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn set_notifications_enabled(&self, enabled: bool) -> Result<(), String> {
        let state = PreferencesFile {
            notifications_enabled: enabled,
        };
        save_preferences(&self.path, &state)
    }
}

impl PreferenceStore for FilePreferences {
    fn notifications_enabled(&self) -> bool {
        match load_preferences(&self.path) {
            Ok(prefs) => prefs.notifications_enabled,
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "Failed to read preferences");
                default_notifications_enabled()
            }
        }
    }
}

fn load_preferences(path: &Path) -> Result<PreferencesFile, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PreferencesFile {
                notifications_enabled: default_notifications_enabled(),
            })
        }
        Err(err) => return Err(format!("Failed to read preferences: {}", err)),
    };

    serde_json::from_slice(&data).map_err(|err| format!("Failed to parse preferences: {}", err))
}

fn save_preferences(path: &Path, state: &PreferencesFile) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create preferences dir: {}", err))?;
    }

    let payload = serde_json::to_vec_pretty(state)
        .map_err(|err| format!("Failed to serialize preferences: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).map_err(|err| format!("Failed to write preferences: {}", err))?;
    fs::rename(&tmp_path, path).map_err(|err| format!("Failed to commit preferences: {}", err))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveNotification {
    pub id: u32,
    pub sensor: SensorKind,
}

/// Presenter for a headless host: keeps the visible set and logs changes.
#[derive(Default)]
pub struct ActiveNotifications {
    visible: Mutex<BTreeMap<u32, SensorKind>>,
}

impl ActiveNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ActiveNotification> {
        self.visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, sensor)| ActiveNotification {
                id: *id,
                sensor: *sensor,
            })
            .collect()
    }
}

impl NotificationPresenter for ActiveNotifications {
    fn show(&self, id: u32, sensor: SensorKind) {
        info!(notification_id = id, sensor = %sensor, "{} is being used", sensor);
        self.visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, sensor);
    }

    fn cancel(&self, id: u32) {
        let removed = self
            .visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        if let Some(sensor) = removed {
            info!(notification_id = id, sensor = %sensor, "Usage notification cancelled");
        }
    }
}

pub struct NotificationGateway {
    preferences: Arc<dyn PreferenceStore>,
    presenter: Arc<dyn NotificationPresenter>,
    ids: NotificationsConfig,
}

impl NotificationGateway {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        presenter: Arc<dyn NotificationPresenter>,
        ids: NotificationsConfig,
    ) -> Self {
        Self {
            preferences,
            presenter,
            ids,
        }
    }

    /// Returns whether a notification was actually shown.
    pub fn show_usage_notification(&self, sensor: SensorKind) -> bool {
        if !self.preferences.notifications_enabled() {
            debug!(sensor = %sensor, "Usage notifications disabled; not showing");
            return false;
        }
        self.presenter.show(self.ids.id_for(sensor), sensor);
        true
    }

    pub fn hide_usage_notification(&self, sensor: SensorKind) {
        self.presenter.cancel(self.ids.id_for(sensor));
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn gateway(
        enabled: bool,
    ) -> (
        Arc<FixedPreference>,
        Arc<RecordingPresenter>,
        NotificationGateway,
    ) {
        let preference = Arc::new(FixedPreference::new(enabled));
        let presenter = Arc::new(RecordingPresenter::default());
        let gateway = NotificationGateway::new(
            preference.clone(),
            presenter.clone(),
            NotificationsConfig::default(),
        );
        (preference, presenter, gateway)
    }

    #[test]
    fn show_respects_preference_at_call_time() {
        let (preference, presenter, gateway) = gateway(false);
        assert!(!gateway.show_usage_notification(SensorKind::Microphone));
        assert_eq!(presenter.shows(), 0);

        preference.set(true);
        assert!(gateway.show_usage_notification(SensorKind::Microphone));
        assert_eq!(
            presenter.calls.lock().unwrap().as_slice(),
            &[PresenterCall::Show(68, SensorKind::Microphone)]
        );
    }

    #[test]
    fn hide_cancels_reserved_id_even_when_disabled() {
        let (_preference, presenter, gateway) = gateway(false);
        gateway.hide_usage_notification(SensorKind::Camera);
        assert_eq!(
            presenter.calls.lock().unwrap().as_slice(),
            &[PresenterCall::Cancel(69)]
        );
    }

    #[test]
    fn active_notifications_cancel_is_noop_when_absent() {
        let active = ActiveNotifications::new();
        active.cancel(68);
        active.show(68, SensorKind::Microphone);
        active.show(68, SensorKind::Microphone);
        assert_eq!(active.snapshot().len(), 1);
        active.cancel(68);
        active.cancel(68);
        assert!(active.snapshot().is_empty());
    }

    #[test]
    fn file_preferences_default_enabled_and_persist() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let prefs = FilePreferences::new(temp_dir.path().join("prefs").join("preferences.json"));
        assert!(prefs.notifications_enabled());

        prefs.set_notifications_enabled(false).expect("save");
        assert!(!prefs.notifications_enabled());

        prefs.set_notifications_enabled(true).expect("save");
        assert!(prefs.notifications_enabled());
    }

    #[test]
    fn file_preferences_pick_up_external_edits() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("preferences.json");
        let prefs = FilePreferences::new(path.clone());

        std::fs::write(&path, r#"{"notifications_enabled": false}"#).expect("write prefs");
        assert!(!prefs.notifications_enabled());
    }

    #[test]
    fn malformed_preferences_file_keeps_notifications_enabled() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("preferences.json");
        std::fs::write(&path, "{not json").expect("write prefs");

        let prefs = FilePreferences::new(path.clone());
        assert!(prefs.notifications_enabled());

        prefs.set_notifications_enabled(false).expect("save over malformed file");
        assert!(!prefs.notifications_enabled());
    }
}
