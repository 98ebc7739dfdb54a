//! Service-scoped state owned by the daemon.
//!
//! Wires one [`SensorProcessor`] per enabled sensor to the callback hub, the
//! shared attribution tracker and the background session writer. Lives from
//! `start` to `stop`; tracker state is never persisted.

use sensor_sentry_protocol::{EventEnvelope, EventType, SensorKind, SessionsQuery};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::attribution::{AttributionSnapshot, AttributionTracker};
use crate::config::SentryConfig;
use crate::db::SessionStore;
use crate::error::StorageError;
use crate::hub::CallbackHub;
use crate::indicator::IndicatorBoard;
use crate::notifications::{
    ActiveNotification, ActiveNotifications, FilePreferences, NotificationGateway,
    PreferenceStore,
};
use crate::session::{Clock, StoredSession};
use crate::tracker::{Collaborators, SensorProcessor, ServiceManager, TrackerState};
use crate::writer::SessionWriter;

pub struct SharedState {
    hub: CallbackHub,
    attribution: Arc<AttributionTracker>,
    processors: BTreeMap<SensorKind, Arc<SensorProcessor>>,
    writer: Arc<SessionWriter>,
    store: Arc<dyn SessionStore>,
    preferences: Arc<FilePreferences>,
    notifications: Arc<ActiveNotifications>,
    indicators: Arc<IndicatorBoard>,
    clock: Arc<dyn Clock>,
    flush_on_stop: bool,
    stopped: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorStatus {
    pub sensor: SensorKind,
    #[serde(flatten)]
    pub tracker: TrackerState,
    pub callback_registered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub sensors: Vec<SensorStatus>,
    pub attribution: AttributionSnapshot,
    pub notifications_enabled: bool,
    pub notifications: Vec<ActiveNotification>,
    pub indicators: Vec<SensorKind>,
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    pub flushed: usize,
    pub discarded: usize,
}

impl SharedState {
    pub fn new(
        config: &SentryConfig,
        store: Arc<dyn SessionStore>,
        preferences: Arc<FilePreferences>,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let writer = Arc::new(SessionWriter::spawn(Arc::clone(&store))?);
        let attribution = Arc::new(AttributionTracker::new());
        let notifications = Arc::new(ActiveNotifications::new());
        let indicators = Arc::new(IndicatorBoard::new());

        let gateway = Arc::new(NotificationGateway::new(
            preferences.clone(),
            notifications.clone(),
            config.notifications,
        ));
        let deps = Collaborators {
            attribution: attribution.clone(),
            notifications: gateway,
            indicator: indicators.clone(),
            sink: writer.clone(),
            clock: clock.clone(),
        };

        let processors = config
            .enabled_sensors()
            .into_iter()
            .map(|sensor| (sensor, Arc::new(SensorProcessor::new(sensor, deps.clone()))))
            .collect();

        Ok(Self {
            hub: CallbackHub::new(),
            attribution,
            processors,
            writer,
            store,
            preferences,
            notifications,
            indicators,
            clock,
            flush_on_stop: config.storage.flush_on_stop,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn start(&self) {
        for processor in self.processors.values() {
            Arc::clone(processor).register_callbacks(&self.hub);
        }
        info!(
            sensors = ?self.processors.keys().collect::<Vec<_>>(),
            flush_on_stop = self.flush_on_stop,
            "Sensor monitoring started"
        );
    }

    /// Routes one inbound event. Returns whether a sensor callback received it.
    pub fn update_from_event(&self, event: &EventEnvelope) -> bool {
        match event.event_type {
            EventType::SensorConfigChanged => {
                let sensor = match event.sensor {
                    Some(sensor) => sensor,
                    None => return false,
                };
                let delivered = self.hub.dispatch(sensor, event.configs());
                if !delivered {
                    debug!(sensor = %sensor, "Sensor event not delivered");
                }
                delivered
            }
            EventType::ForegroundActorChanged => {
                let actor = match event.actor.as_deref().map(str::trim) {
                    Some(actor) if !actor.is_empty() => actor,
                    _ => return false,
                };
                self.attribution.record(actor, self.clock.now());
                for processor in self.processors.values() {
                    processor.event_action_by_package_name(actor);
                }
                false
            }
        }
    }

    pub fn status_snapshot(&self) -> ServiceStatus {
        let sensors = self
            .processors
            .values()
            .map(|processor| SensorStatus {
                sensor: processor.sensor(),
                tracker: processor.state(),
                callback_registered: self.hub.is_registered(processor.sensor()),
            })
            .collect();

        ServiceStatus {
            sensors,
            attribution: self.attribution.snapshot(),
            notifications_enabled: self.preferences.notifications_enabled(),
            notifications: self.notifications.snapshot(),
            indicators: self.indicators.visible(),
            stopped: self.is_stopped(),
        }
    }

    pub fn sessions_snapshot(
        &self,
        query: &SessionsQuery,
    ) -> Result<Vec<StoredSession>, StorageError> {
        self.store.list_sessions(query.sensor, query.effective_limit())
    }

    pub fn session_snapshot(&self, id: i64) -> Result<Option<StoredSession>, StorageError> {
        self.store.get_session(id)
    }

    pub fn set_notifications_enabled(&self, enabled: bool) -> Result<(), String> {
        self.preferences.set_notifications_enabled(enabled)?;
        info!(enabled, "Usage notification preference updated");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Flushes or discards open sessions, unregisters callbacks and drains the
    /// writer. Only the first call does anything.
    pub fn stop(&self) -> StopSummary {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return StopSummary::default();
        }

        let mut summary = StopSummary::default();
        for processor in self.processors.values() {
            processor.dispose_resources(&self.hub);
            if self.flush_on_stop {
                if processor.force_close() {
                    summary.flushed += 1;
                }
            } else if processor.discard_open_session() {
                summary.discarded += 1;
            }
        }

        self.writer.shutdown();
        info!(
            flushed = summary.flushed,
            discarded = summary.discarded,
            "Sensor monitoring stopped"
        );
        summary
    }

    #[cfg(test)]
    pub fn processor(&self, sensor: SensorKind) -> Option<&Arc<SensorProcessor>> {
        self.processors.get(&sensor)
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        if !self.is_stopped() {
            warn!("Shared state dropped without stop; stopping now");
            self.stop();
        }
    }
}
