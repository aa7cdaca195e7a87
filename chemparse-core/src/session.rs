use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::entities::{ExampleDoc, Submission};

pub type SessionId = Uuid;

pub const DEFAULT_MAX_SESSIONS: usize = 64;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Marks one document selection of a session. Only the latest one may become active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection(u64);

/// What one browser session currently looks at.
#[derive(Debug)]
pub struct SessionState {
    active: Option<Arc<Submission>>,
    /// Example submissions already computed in this session
    examples: HashMap<ExampleDoc, Arc<Submission>>,
    /// Shown once on the next render, then cleared
    last_error: Option<String>,
    selection: u64,
    last_seen: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active: None,
            examples: HashMap::new(),
            last_error: None,
            selection: 0,
            last_seen: Instant::now(),
        }
    }
}

impl SessionState {
    pub fn active(&self) -> Option<Arc<Submission>> {
        self.active.clone()
    }

    pub fn example(&self, example: ExampleDoc) -> Option<Arc<Submission>> {
        self.examples.get(&example).cloned()
    }

    /// Makes `submission` the active one. Example submissions are also memoized.
    pub fn replace(&mut self, submission: Arc<Submission>) {
        if let Some(example) = submission.source().example() {
            self.examples.insert(example, submission.clone());
        }
        self.last_error = None;
        self.active = Some(submission);
    }

    /// Reactivates a memoized example, returns false if it was never computed here.
    pub fn activate_example(&mut self, example: ExampleDoc) -> bool {
        match self.examples.get(&example) {
            Some(submission) => {
                self.selection += 1;
                self.active = Some(submission.clone());
                self.last_error = None;
                true
            }
            None => false,
        }
    }

    /// Starts a new document selection. Anything still running for an older one
    /// can no longer become active.
    pub fn begin_selection(&mut self) -> Selection {
        self.selection += 1;
        Selection(self.selection)
    }

    pub fn is_current(&self, selection: Selection) -> bool {
        selection.0 == self.selection
    }

    /// Activates `submission` if `selection` is still the latest one. Example
    /// submissions are memoized either way.
    pub fn complete(&mut self, selection: Selection, submission: Arc<Submission>) -> bool {
        if self.is_current(selection) {
            self.replace(submission);
            return true;
        }
        if let Some(example) = submission.source().example() {
            self.examples.insert(example, submission);
        }
        false
    }

    /// Records the error of `selection` unless a newer selection started since.
    pub fn fail(&mut self, selection: Selection, message: impl Into<String>) -> bool {
        let current = self.is_current(selection);
        if current {
            self.record_error(message);
        }
        current
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}

/// Per-session state, evicting idle sessions and, past capacity, the least recently
/// seen one. Sessions never share submissions with each other.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionId, SessionState>,
    max_sessions: usize,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionState> {
        self.sessions.get(id)
    }

    /// Returns the session, creating it if unknown or expired.
    pub fn get_or_create(&mut self, id: SessionId) -> &mut SessionState {
        self.evict_expired();
        if !self.sessions.contains_key(&id) && self.sessions.len() >= self.max_sessions {
            self.evict_oldest();
        }
        let state = self.sessions.entry(id).or_default();
        state.last_seen = Instant::now();
        state
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionState> {
        self.sessions.remove(id)
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.last_seen.elapsed() < ttl);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            tracing::debug!("evicted {evicted} expired sessions");
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, s)| s.last_seen)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            tracing::debug!("session store full, evicting {id}");
            self.sessions.remove(&id);
        }
    }
}
