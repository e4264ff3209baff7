//! Pauses a memo's refresh while someone is typing in it.
//!
//! Input marks the key as actively edited and disables its poll. After
//! `idle_delay` without further input, or on blur, the poll resumes. The gate
//! only toggles the scheduler; it never touches realtime delivery.

use super::scheduler::PollScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
struct EditSession {
    editing: bool,
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

struct GateInner {
    scheduler: Arc<PollScheduler>,
    idle_delay: Duration,
    sessions: Mutex<HashMap<String, EditSession>>,
}

#[derive(Clone)]
pub struct EditGate {
    inner: Arc<GateInner>,
}

impl EditGate {
    pub fn new(scheduler: Arc<PollScheduler>, idle_delay: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                scheduler,
                idle_delay,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Set the editing flag for `key` directly, cancelling any idle timer.
    pub async fn set_actively_editing(&self, key: &str, editing: bool) {
        {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions.entry(key.to_string()).or_default();
            session.editing = editing;
            session.generation += 1;
            if let Some(timer) = session.idle_timer.take() {
                timer.abort();
            }
        }
        self.apply(key, editing).await;
    }

    /// Record a keystroke: pause polling now and resume after the idle delay.
    pub async fn note_input(&self, key: &str) {
        let was_editing = {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions.entry(key.to_string()).or_default();
            let was_editing = session.editing;
            session.editing = true;
            session.generation += 1;
            if let Some(timer) = session.idle_timer.take() {
                timer.abort();
            }

            let gate = self.clone();
            let key = key.to_string();
            let generation = session.generation;
            session.idle_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(gate.inner.idle_delay).await;
                gate.idle_expired(&key, generation).await;
            }));
            was_editing
        };

        if !was_editing {
            self.apply(key, true).await;
        }
    }

    /// Focus left the editor; resume polling immediately.
    pub async fn blur(&self, key: &str) {
        self.set_actively_editing(key, false).await;
    }

    pub async fn is_actively_editing(&self, key: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .await
            .get(key)
            .is_some_and(|session| session.editing)
    }

    /// Drop all state for `key`, e.g. when its editor closes.
    pub async fn forget(&self, key: &str) {
        if let Some(session) = self.inner.sessions.lock().await.remove(key) {
            if let Some(timer) = session.idle_timer {
                timer.abort();
            }
        }
    }

    async fn idle_expired(&self, key: &str, generation: u64) {
        {
            let mut sessions = self.inner.sessions.lock().await;
            let Some(session) = sessions.get_mut(key) else {
                return;
            };
            if session.generation != generation {
                return;
            }
            session.editing = false;
            session.idle_timer = None;
        }
        tracing::debug!("editing of {} went idle", key);
        self.apply(key, false).await;
    }

    async fn apply(&self, key: &str, editing: bool) {
        if editing {
            self.inner.scheduler.disable(key).await;
        } else {
            self.inner.scheduler.enable(key).await;
        }
    }
}
