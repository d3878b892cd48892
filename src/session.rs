//! In-memory session state shared by the event handlers.
//!
//! Created when the service starts and dropped (or [`Session::clear`]ed) when
//! it stops. Nothing here is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::NoteHandle;

#[derive(Default)]
struct SessionState {
    current: Option<NoteHandle>,
    previous: Option<NoteHandle>,
    in_flight: HashSet<String>,
    recent: HashMap<String, Instant>,
    attempts: HashMap<String, u32>,
}

pub struct Session {
    state: Mutex<SessionState>,
    cooldown: Duration,
}

impl Session {
    pub fn new(cooldown: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState::default()),
            cooldown,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state mutex")
    }

    /// Records navigation to `note` and returns the note navigated from.
    /// Non-markdown notes leave the tracker untouched.
    pub fn record_navigation(&self, note: &NoteHandle) -> Option<NoteHandle> {
        let mut state = self.lock();
        if !note.is_markdown() {
            return state.current.clone();
        }
        if state.current.as_ref().map_or(false, |c| c.path == note.path) {
            state.current = Some(note.clone());
            return state.previous.clone();
        }
        state.previous = state.current.replace(note.clone());
        state.previous.clone()
    }

    pub fn current(&self) -> Option<NoteHandle> {
        self.lock().current.clone()
    }

    pub fn previous(&self) -> Option<NoteHandle> {
        self.lock().previous.clone()
    }

    /// Keeps tracked handles pointing at a note that moved.
    pub fn rename(&self, old_path: &str, renamed: &NoteHandle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        for slot in [&mut state.current, &mut state.previous] {
            if let Some(handle) = slot.as_mut() {
                if handle.path == old_path {
                    *handle = renamed.clone();
                }
            }
        }
        if let Some(at) = state.recent.remove(old_path) {
            state.recent.insert(renamed.path.clone(), at);
        }
    }

    pub fn is_in_flight(&self, path: &str) -> bool {
        self.lock().in_flight.contains(path)
    }

    /// Claims `path` for one generation. `None` if it is already claimed.
    pub fn try_begin(self: &Arc<Self>, path: &str) -> Option<InFlightGuard> {
        let mut state = self.lock();
        if !state.in_flight.insert(path.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            session: Arc::clone(self),
            path: path.to_string(),
        })
    }

    pub fn recently_processed(&self, path: &str) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        let cooldown = self.cooldown;
        state
            .recent
            .retain(|_, at| now.duration_since(*at) < cooldown);
        state.recent.contains_key(path)
    }

    pub fn mark_processed(&self, path: &str) {
        self.lock().recent.insert(path.to_string(), Instant::now());
    }

    /// Counts one more attempt for `path` and returns the new total.
    pub fn record_attempt(&self, path: &str) -> u32 {
        let mut state = self.lock();
        let count = state.attempts.entry(path.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, path: &str) -> u32 {
        self.lock().attempts.get(path).copied().unwrap_or(0)
    }

    pub fn clear(&self) {
        *self.lock() = SessionState::default();
    }
}

/// Holds a note's in-flight slot. Dropping it releases the slot and the
/// note's attempt counter, on every exit path.
pub struct InFlightGuard {
    session: Arc<Session>,
    path: String,
}

impl InFlightGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.session.lock();
        state.in_flight.remove(&self.path);
        state.attempts.remove(&self.path);
    }
}
