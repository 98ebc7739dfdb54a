//! Per-sensor usage session state machine.
//!
//! Converts the stream of "active recording configurations changed" callbacks
//! into closed, non-overlapping usage sessions:
//!
//! - `Idle -> Active` on a non-empty config list: stamp the start time, show
//!   the usage notification (if enabled) and the indicator.
//! - `Active -> Idle` on an empty list: build the session, hand it to the
//!   writer, hide notification and indicator.
//! - Repeated active events only re-show the indicator; repeated inactive
//!   events do nothing.
//!
//! The session actor is resolved at close time from the shared
//! [`AttributionTracker`], falling back to the actor this sensor saw last
//! while idle.

use chrono::{DateTime, Utc};
use sensor_sentry_protocol::{RecordingConfig, SensorKind};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::attribution::AttributionTracker;
use crate::hub::{CallbackHub, SensorCallback};
use crate::indicator::IndicatorHook;
use crate::notifications::NotificationGateway;
use crate::session::{format_timestamp, Clock, UsageSession};
use crate::writer::SessionSink;

/// Host-service lifecycle hooks implemented by each sensor processor.
pub trait ServiceManager {
    fn register_callbacks(self: Arc<Self>, hub: &CallbackHub);
    fn dispose_resources(&self, hub: &CallbackHub);
    fn event_action_by_package_name(&self, actor: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerState {
    pub is_active: bool,
    /// Last actor seen while idle; frozen while a session is open.
    pub current_actor: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
}

/// Everything a processor talks to. Shared by all sensors of one service.
#[derive(Clone)]
pub struct Collaborators {
    pub attribution: Arc<AttributionTracker>,
    pub notifications: Arc<NotificationGateway>,
    pub indicator: Arc<dyn IndicatorHook>,
    pub sink: Arc<dyn SessionSink>,
    pub clock: Arc<dyn Clock>,
}

pub struct SensorProcessor {
    sensor: SensorKind,
    state: Mutex<TrackerState>,
    alive: AtomicBool,
    deps: Collaborators,
}

impl SensorProcessor {
    pub fn new(sensor: SensorKind, deps: Collaborators) -> Self {
        Self {
            sensor,
            state: Mutex::new(TrackerState::default()),
            alive: AtomicBool::new(true),
            deps,
        }
    }

    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    pub fn state(&self) -> TrackerState {
        self.lock_state().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Closes and persists an open session. Returns whether one was open.
    pub fn force_close(&self) -> bool {
        let mut state = self.lock_state();
        self.close_session(&mut state, "forced")
    }

    /// Drops an open session without persisting it.
    pub fn discard_open_session(&self) -> bool {
        let mut state = self.lock_state();
        if !state.is_active {
            return false;
        }

        state.is_active = false;
        let started_at = state.session_started_at.take();
        warn!(
            sensor = %self.sensor,
            started_at = ?started_at.as_ref().map(format_timestamp),
            "Open sensor session discarded"
        );
        self.deps.notifications.hide_usage_notification(self.sensor);
        self.deps.indicator.hide_indicator(self.sensor);
        true
    }

    fn set_sensor_in_use(&self) {
        let now = self.deps.clock.now();
        let mut state = self.lock_state();

        if state.is_active {
            debug!(sensor = %self.sensor, "Sensor already active");
        } else {
            state.is_active = true;
            state.session_started_at = Some(now);
            if let Some(actor) = self.deps.attribution.current_actor() {
                state.current_actor = Some(actor);
            }
            info!(
                sensor = %self.sensor,
                actor = ?state.current_actor,
                started_at = %format_timestamp(&now),
                "Sensor in use"
            );
            self.deps.notifications.show_usage_notification(self.sensor);
        }

        self.deps.indicator.show_indicator(self.sensor);
    }

    fn set_sensor_not_in_use(&self) {
        let mut state = self.lock_state();
        if !self.close_session(&mut state, "released") {
            debug!(sensor = %self.sensor, "Sensor already idle");
        }
    }

    /// Caller holds the state lock for the whole transition, so side effects
    /// are ordered with the state change.
    fn close_session(&self, state: &mut TrackerState, reason: &str) -> bool {
        if !state.is_active {
            return false;
        }

        let ended_at = self.deps.clock.now();
        let started_at = state
            .session_started_at
            .take()
            .map(|started| started.min(ended_at))
            .unwrap_or(ended_at);
        let actor = self
            .deps
            .attribution
            .current_actor()
            .or_else(|| state.current_actor.clone());
        state.is_active = false;

        info!(
            sensor = %self.sensor,
            actor = ?actor,
            reason,
            duration_ms = ended_at.signed_duration_since(started_at).num_milliseconds(),
            "Sensor session closed"
        );

        self.deps.sink.submit(UsageSession {
            sensor: self.sensor,
            actor,
            started_at,
            ended_at,
        });
        self.deps.notifications.hide_usage_notification(self.sensor);
        self.deps.indicator.hide_indicator(self.sensor);
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SensorCallback for SensorProcessor {
    fn on_config_changed(&self, configs: &[RecordingConfig]) {
        if !self.is_alive() {
            debug!(sensor = %self.sensor, "Ignoring callback after dispose");
            return;
        }

        if configs.is_empty() {
            self.set_sensor_not_in_use();
        } else {
            self.set_sensor_in_use();
        }
    }
}

impl ServiceManager for SensorProcessor {
    fn register_callbacks(self: Arc<Self>, hub: &CallbackHub) {
        self.alive.store(true, Ordering::SeqCst);
        let sensor = self.sensor;
        hub.register(sensor, self);
        debug!(sensor = %sensor, "Sensor callback registered");
    }

    fn dispose_resources(&self, hub: &CallbackHub) {
        // Unregister first: the hub waits for any in-flight delivery.
        hub.unregister(self.sensor);
        self.alive.store(false, Ordering::SeqCst);
        debug!(sensor = %self.sensor, "Sensor callback disposed");
    }

    fn event_action_by_package_name(&self, actor: &str) {
        let mut state = self.lock_state();
        if !state.is_active {
            state.current_actor = Some(actor.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationsConfig;
    use crate::indicator::IndicatorBoard;
    use crate::notifications::testing::{FixedPreference, RecordingPresenter};
    use crate::session::{millis_to_time, ManualClock};

    #[derive(Default)]
    struct RecordingSink {
        sessions: Mutex<Vec<UsageSession>>,
    }

    impl RecordingSink {
        fn sessions(&self) -> Vec<UsageSession> {
            self.sessions.lock().unwrap().clone()
        }
    }

    impl SessionSink for RecordingSink {
        fn submit(&self, session: UsageSession) {
            self.sessions.lock().unwrap().push(session);
        }
    }

    struct Harness {
        processor: Arc<SensorProcessor>,
        attribution: Arc<AttributionTracker>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        presenter: Arc<RecordingPresenter>,
        indicator: Arc<IndicatorBoard>,
    }

    impl Harness {
        fn new(notifications_enabled: bool) -> Self {
            let attribution = Arc::new(AttributionTracker::new());
            let clock = Arc::new(ManualClock::at_millis(0));
            let sink = Arc::new(RecordingSink::default());
            let presenter = Arc::new(RecordingPresenter::default());
            let indicator = Arc::new(IndicatorBoard::new());
            let notifications = Arc::new(NotificationGateway::new(
                Arc::new(FixedPreference::new(notifications_enabled)),
                presenter.clone(),
                NotificationsConfig::default(),
            ));
            let deps = Collaborators {
                attribution: attribution.clone(),
                notifications,
                indicator: indicator.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
            };
            Self {
                processor: Arc::new(SensorProcessor::new(SensorKind::Microphone, deps)),
                attribution,
                clock,
                sink,
                presenter,
                indicator,
            }
        }

        fn activate_at(&self, millis: i64) {
            self.clock.set_millis(millis);
            self.processor
                .on_config_changed(&[RecordingConfig::default()]);
        }

        fn deactivate_at(&self, millis: i64) {
            self.clock.set_millis(millis);
            self.processor.on_config_changed(&[]);
        }

        fn foreground(&self, actor: &str) {
            self.attribution.record(actor, self.clock.now());
            self.processor.event_action_by_package_name(actor);
        }
    }

    #[test]
    fn activate_then_deactivate_writes_one_session() {
        let harness = Harness::new(true);
        harness.activate_at(100);
        harness.deactivate_at(250);

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_at, millis_to_time(100));
        assert_eq!(sessions[0].ended_at, millis_to_time(250));
        assert_eq!(sessions[0].sensor, SensorKind::Microphone);
        assert_eq!(harness.processor.state(), TrackerState::default());
    }

    #[test]
    fn duplicate_activation_writes_one_session() {
        let harness = Harness::new(true);
        harness.activate_at(100);
        harness.activate_at(150);
        harness.deactivate_at(300);

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_at, millis_to_time(100));
        assert_eq!(harness.presenter.shows(), 1);
    }

    #[test]
    fn duplicate_deactivation_is_noop() {
        let harness = Harness::new(true);
        harness.activate_at(10);
        harness.deactivate_at(20);
        harness.deactivate_at(30);

        assert_eq!(harness.sink.sessions().len(), 1);
        assert!(!harness.processor.state().is_active);
    }

    #[test]
    fn deactivation_without_activation_writes_nothing() {
        let harness = Harness::new(true);
        harness.deactivate_at(50);

        assert!(harness.sink.sessions().is_empty());
        assert!(!harness.processor.state().is_active);
        assert_eq!(harness.presenter.calls.lock().unwrap().len(), 0);
    }

    #[test]
    fn session_count_matches_active_to_idle_transitions() {
        let harness = Harness::new(false);
        let pattern = [true, true, false, false, true, false, true, true, true, false, false];
        let mut was_active = false;
        let mut expected = 0;

        for (step, active) in pattern.iter().enumerate() {
            let at = (step as i64 + 1) * 10;
            if *active {
                harness.activate_at(at);
            } else {
                harness.deactivate_at(at);
                if was_active {
                    expected += 1;
                }
            }
            was_active = *active;
        }

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), expected);
        assert!(sessions
            .iter()
            .all(|session| session.started_at <= session.ended_at));
    }

    #[test]
    fn falls_back_to_sensor_actor_when_tracker_is_empty() {
        let harness = Harness::new(true);
        // Delivered straight to the processor; the shared tracker never sees it.
        harness.processor.event_action_by_package_name("com.direct");
        assert!(harness.attribution.current_actor().is_none());

        harness.activate_at(100);
        harness.deactivate_at(200);

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].actor.as_deref(), Some("com.direct"));
    }

    #[test]
    fn session_without_any_actor_is_unattributed() {
        let harness = Harness::new(true);
        harness.activate_at(100);
        harness.deactivate_at(200);
        assert_eq!(harness.sink.sessions()[0].actor, None);
    }

    #[test]
    fn attribution_uses_last_actor_before_close() {
        let harness = Harness::new(true);
        harness.foreground("com.a");
        harness.foreground("com.b");
        harness.activate_at(100);
        assert_eq!(
            harness.processor.state().current_actor.as_deref(),
            Some("com.b")
        );

        harness.foreground("com.c");
        // Frozen while active.
        assert_eq!(
            harness.processor.state().current_actor.as_deref(),
            Some("com.b")
        );
        harness.deactivate_at(200);

        let sessions = harness.sink.sessions();
        assert_eq!(sessions[0].actor.as_deref(), Some("com.c"));
    }

    #[test]
    fn unknown_actor_is_recorded_as_none() {
        let harness = Harness::new(true);
        harness.activate_at(1);
        harness.deactivate_at(2);
        assert_eq!(harness.sink.sessions()[0].actor, None);
    }

    #[test]
    fn notifications_gated_by_preference() {
        let disabled = Harness::new(false);
        disabled.activate_at(1);
        disabled.activate_at(2);
        assert_eq!(disabled.presenter.shows(), 0);

        let enabled = Harness::new(true);
        enabled.activate_at(1);
        enabled.activate_at(2);
        enabled.deactivate_at(3);
        enabled.activate_at(4);
        assert_eq!(enabled.presenter.shows(), 2);
    }

    #[test]
    fn indicator_follows_sensor_state() {
        let harness = Harness::new(true);
        harness.activate_at(1);
        assert_eq!(harness.indicator.visible(), vec![SensorKind::Microphone]);
        harness.deactivate_at(2);
        assert!(harness.indicator.visible().is_empty());
    }

    #[test]
    fn clock_going_backwards_never_inverts_session() {
        let harness = Harness::new(true);
        harness.activate_at(500);
        harness.deactivate_at(400);

        let session = &harness.sink.sessions()[0];
        assert!(session.started_at <= session.ended_at);
        assert_eq!(session.ended_at, millis_to_time(400));
    }

    #[test]
    fn force_close_persists_open_session() {
        let harness = Harness::new(true);
        harness.activate_at(100);
        harness.clock.set_millis(180);

        assert!(harness.processor.force_close());
        assert!(!harness.processor.force_close());

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].ended_at, millis_to_time(180));
    }

    #[test]
    fn discard_drops_open_session() {
        let harness = Harness::new(true);
        harness.foreground("com.keep");
        harness.activate_at(100);

        assert!(harness.processor.discard_open_session());
        assert!(!harness.processor.discard_open_session());
        assert!(harness.sink.sessions().is_empty());
        assert!(harness.indicator.visible().is_empty());

        let state = harness.processor.state();
        assert!(!state.is_active);
        assert_eq!(state.session_started_at, None);
        assert_eq!(state.current_actor.as_deref(), Some("com.keep"));
    }

    #[test]
    fn callbacks_after_dispose_are_ignored() {
        let harness = Harness::new(true);
        let hub = CallbackHub::new();
        Arc::clone(&harness.processor).register_callbacks(&hub);
        assert!(hub.is_registered(SensorKind::Microphone));

        harness.processor.dispose_resources(&hub);
        assert!(!hub.is_registered(SensorKind::Microphone));

        // A late delivery that still holds a reference must not open a session.
        harness.activate_at(10);
        harness.deactivate_at(20);
        assert!(harness.sink.sessions().is_empty());
        assert!(!harness.processor.state().is_active);
    }

    #[test]
    fn hub_delivery_drives_the_state_machine() {
        let harness = Harness::new(true);
        let hub = CallbackHub::new();
        Arc::clone(&harness.processor).register_callbacks(&hub);

        harness.clock.set_millis(100);
        hub.dispatch(SensorKind::Microphone, &[RecordingConfig::default()]);
        harness.clock.set_millis(250);
        hub.dispatch(SensorKind::Microphone, &[]);

        assert_eq!(harness.sink.sessions().len(), 1);
    }

    #[test]
    fn concurrent_foreground_events_do_not_break_sessions() {
        let harness = Arc::new(Harness::new(false));
        let writer = {
            let harness = Arc::clone(&harness);
            std::thread::spawn(move || {
                for index in 0..200 {
                    harness.foreground(&format!("com.app{}", index % 7));
                }
            })
        };

        for cycle in 0..50 {
            harness.activate_at(cycle * 10);
            harness.deactivate_at(cycle * 10 + 5);
        }
        writer.join().expect("foreground thread");

        let sessions = harness.sink.sessions();
        assert_eq!(sessions.len(), 50);
        assert!(sessions
            .iter()
            .all(|session| session.started_at <= session.ended_at));
    }
}
