//! Hardware callback registry.
//!
//! Stands in for the platform's recording-callback API: a subscriber
//! registers per sensor kind and receives every change to the set of active
//! recording configurations. Delivery is serialized across the hub.

use sensor_sentry_protocol::{RecordingConfig, SensorKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub trait SensorCallback: Send + Sync {
    /// Empty `configs` means the sensor is no longer in use.
    fn on_config_changed(&self, configs: &[RecordingConfig]);
}

#[derive(Default)]
pub struct CallbackHub {
    callbacks: Mutex<HashMap<SensorKind, Arc<dyn SensorCallback>>>,
}

impl CallbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous subscriber for `sensor`.
    pub fn register(&self, sensor: SensorKind, callback: Arc<dyn SensorCallback>) {
        let mut callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if callbacks.insert(sensor, callback).is_some() {
            debug!(sensor = %sensor, "Replaced existing sensor callback");
        }
    }

    pub fn unregister(&self, sensor: SensorKind) {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&sensor);
    }

    pub fn is_registered(&self, sensor: SensorKind) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&sensor)
    }

    /// Returns false when nobody is subscribed to `sensor`.
    pub fn dispatch(&self, sensor: SensorKind, configs: &[RecordingConfig]) -> bool {
        // Held across the call so callbacks never overlap and an unregister
        // waits for an in-flight delivery to finish.
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match callbacks.get(&sensor) {
            Some(callback) => {
                callback.on_config_changed(configs);
                true
            }
            None => {
                debug!(sensor = %sensor, "No callback registered; dropping config change");
                false
            }
        }
    }
}
