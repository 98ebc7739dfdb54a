//! On-screen "sensor active" indicator hook. Fire-and-forget.

use sensor_sentry_protocol::SensorKind;
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::debug;

pub trait IndicatorHook: Send + Sync {
    fn show_indicator(&self, sensor: SensorKind);
    fn hide_indicator(&self, sensor: SensorKind);
}

/// Indicator state for clients that poll `get_status`.
#[derive(Default)]
pub struct IndicatorBoard {
    visible: Mutex<BTreeSet<SensorKind>>,
}

impl IndicatorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<SensorKind> {
        self.visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }
}

impl IndicatorHook for IndicatorBoard {
    fn show_indicator(&self, sensor: SensorKind) {
        let inserted = self
            .visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(sensor);
        if inserted {
            debug!(sensor = %sensor, "Indicator shown");
        }
    }

    fn hide_indicator(&self, sensor: SensorKind) {
        let removed = self
            .visible
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&sensor);
        if removed {
            debug!(sensor = %sensor, "Indicator hidden");
        }
    }
}
