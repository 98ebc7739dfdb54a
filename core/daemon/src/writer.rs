//! Background session writer.
//!
//! Sessions are handed off to one consumer thread so the callback path never
//! waits on SQLite. A single consumer keeps inserts in close order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::db::SessionStore;
use crate::session::{format_timestamp, UsageSession};

/// Destination for closed sessions.
pub trait SessionSink: Send + Sync {
    /// Queues a session; returns once it is enqueued.
    fn submit(&self, session: UsageSession);
}

pub struct SessionWriter {
    sender: Mutex<Option<Sender<UsageSession>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionWriter {
    pub fn spawn(store: Arc<dyn SessionStore>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("session-writer".to_string())
            .spawn(move || drain(store, receiver))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Closes the queue and waits for pending inserts to finish.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Session writer thread panicked");
            }
        }
    }
}

impl SessionSink for SessionWriter {
    fn submit(&self, session: UsageSession) {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(sender) => {
                if let Err(err) = sender.send(session) {
                    warn!(sensor = %err.0.sensor, "Session writer is gone; session dropped");
                }
            }
            None => {
                warn!(sensor = %session.sensor, "Session writer closed; session dropped");
            }
        }
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain(store: Arc<dyn SessionStore>, receiver: Receiver<UsageSession>) {
    for session in receiver {
        match store.insert(&session) {
            Ok(id) => {
                info!(
                    session_id = id,
                    sensor = %session.sensor,
                    actor = ?session.actor,
                    started_at = %format_timestamp(&session.started_at),
                    ended_at = %format_timestamp(&session.ended_at),
                    "Usage session stored"
                );
            }
            Err(err) => {
                warn!(
                    error = %err,
                    sensor = %session.sensor,
                    actor = ?session.actor,
                    "Failed to store usage session"
                );
            }
        }
    }
    debug!("Session writer queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::session::{millis_to_time, StoredSession};
    use sensor_sentry_protocol::SensorKind;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<UsageSession>>,
        fail_actor: Option<String>,
    }

    impl SessionStore for MemoryStore {
        fn insert(&self, session: &UsageSession) -> Result<i64, StorageError> {
            if session.actor.is_some() && session.actor == self.fail_actor {
                return Err(StorageError::Rejected("constraint".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(session.clone());
            Ok(rows.len() as i64)
        }

        fn list_sessions(
            &self,
            _sensor: Option<SensorKind>,
            _limit: usize,
        ) -> Result<Vec<StoredSession>, StorageError> {
            Ok(Vec::new())
        }

        fn get_session(&self, _id: i64) -> Result<Option<StoredSession>, StorageError> {
            Ok(None)
        }
    }

    fn session(actor: &str, start: i64) -> UsageSession {
        UsageSession {
            sensor: SensorKind::Microphone,
            actor: Some(actor.to_string()),
            started_at: millis_to_time(start),
            ended_at: millis_to_time(start + 10),
        }
    }

    #[test]
    fn preserves_submission_order() {
        let store = Arc::new(MemoryStore::default());
        let writer = SessionWriter::spawn(store.clone()).expect("spawn writer");

        for index in 0..50 {
            writer.submit(session(&format!("app-{}", index), index * 100));
        }
        writer.shutdown();

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 50);
        for (index, row) in rows.iter().enumerate() {
            assert_eq!(row.actor.as_deref(), Some(format!("app-{}", index).as_str()));
        }
    }

    #[test]
    fn storage_failure_does_not_stop_the_queue() {
        let store = Arc::new(MemoryStore {
            rows: Mutex::new(Vec::new()),
            fail_actor: Some("broken".to_string()),
        });
        let writer = SessionWriter::spawn(store.clone()).expect("spawn writer");

        writer.submit(session("first", 0));
        writer.submit(session("broken", 100));
        writer.submit(session("third", 200));
        writer.shutdown();

        let actors: Vec<_> = store
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter_map(|row| row.actor.clone())
            .collect();
        assert_eq!(actors, vec!["first".to_string(), "third".to_string()]);
    }

    #[test]
    fn submit_after_shutdown_is_dropped() {
        let store = Arc::new(MemoryStore::default());
        let writer = SessionWriter::spawn(store.clone()).expect("spawn writer");
        writer.shutdown();
        writer.submit(session("late", 0));
        writer.shutdown();
        assert!(store.rows.lock().unwrap().is_empty());
    }
}
