//! Per-(user, session) conversation state.
//!
//! Sessions live in memory for the process lifetime and are removed only by
//! an explicit `clear`. Each session sits behind its own lock so different
//! sessions never contend; the map lock is held only to find or insert.

use std::collections::HashMap;
use std::sync::Arc;

use atmos_weather::Coordinate;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// A resolved place remembered for follow-up questions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnownLocation {
    pub label: String,
    pub coordinate: Coordinate,
}

/// One answered query
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub query: String,
    pub location: Option<KnownLocation>,
    pub response: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    key: SessionKey,
    turns: Vec<Turn>,
    last_location: Option<KnownLocation>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            turns: Vec::new(),
            last_location: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Coordinate of the most recent turn that resolved a place
    pub fn last_location(&self) -> Option<Coordinate> {
        self.last_location.as_ref().map(|l| l.coordinate)
    }

    pub fn last_known(&self) -> Option<&KnownLocation> {
        self.last_location.as_ref()
    }

    fn push_turn(&mut self, turn: Turn) {
        if let Some(location) = &turn.location {
            self.last_location = Some(location.clone());
        }
        self.turns.push(turn);
    }
}

/// Shared handle to one session. Lock briefly; never across an await.
pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for the key, or a new empty one.
    ///
    /// Racing callers with the same key always receive the same handle.
    pub fn get_or_create(&self, user_id: &str, session_id: &str) -> SessionHandle {
        let key = SessionKey::new(user_id, session_id);

        if let Some(existing) = self.sessions.read().get(&key) {
            return existing.clone();
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(key)
            .or_insert_with_key(|key| {
                tracing::debug!(
                    "Creating session {} for user {}",
                    key.session_id,
                    key.user_id
                );
                Arc::new(Mutex::new(Session::new(key.clone())))
            })
            .clone()
    }

    pub fn get(&self, user_id: &str, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .get(&SessionKey::new(user_id, session_id))
            .cloned()
    }

    /// Record an answered query. A resolved `location` becomes the session's
    /// last known location.
    pub fn append_turn(
        &self,
        session: &SessionHandle,
        query: &str,
        location: Option<KnownLocation>,
        response: &str,
    ) {
        session.lock().push_turn(Turn {
            query: query.to_string(),
            location,
            response: response.to_string(),
            at: Utc::now(),
        });
    }

    pub fn last_location(&self, session: &SessionHandle) -> Option<Coordinate> {
        session.lock().last_location()
    }

    pub fn last_known(&self, session: &SessionHandle) -> Option<KnownLocation> {
        session.lock().last_known().cloned()
    }

    /// Forget a session. Returns whether it existed.
    pub fn clear(&self, user_id: &str, session_id: &str) -> bool {
        self.sessions
            .write()
            .remove(&SessionKey::new(user_id, session_id))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
