use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{ChatMessage, ChatSession};

pub const DEFAULT_TITLE: &str = "New chat";

const EVENT_CAPACITY: usize = 64;

/// Notifications for observers of the registry (navigation, front-ends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ActiveChanged {
        previous: Option<String>,
        current: Option<String>,
    },
}

/// Owns every chat session and the active-session pointer.
pub struct SessionRegistry {
    // insertion order; breaks createdAt ties
    sessions: Vec<ChatSession>,
    active_session_id: Option<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SessionRegistry {
            sessions: Vec::new(),
            active_session_id: None,
            events,
        }
    }

    /// Receives every future change of the active pointer.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create an empty session stamped with the current time and make it active.
    pub fn create_session(&mut self, title: Option<&str>) -> String {
        self.create_session_at(title, Utc::now())
    }

    pub fn create_session_at(&mut self, title: Option<&str>, created_at: DateTime<Utc>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let title = title.unwrap_or(DEFAULT_TITLE).to_string();
        debug!(session_id = %id, %title, "creating session");

        self.sessions
            .push(ChatSession::new(id.clone(), title, created_at));
        self.set_active(Some(id.clone()));
        id
    }

    /// Process-start convenience: make sure at least one session exists.
    pub fn ensure_default_session(&mut self) -> Option<String> {
        if self.sessions.is_empty() {
            Some(self.create_session(None))
        } else {
            None
        }
    }

    /// Remove a session; the newest survivor takes over if it was active.
    pub fn delete_session(&mut self, id: &str) {
        let Some(index) = self.sessions.iter().position(|s| s.id() == id) else {
            return;
        };
        self.sessions.remove(index);
        debug!(session_id = %id, "deleted session");

        if self.active_session_id.as_deref() == Some(id) {
            // max_by_key keeps the last of equal keys, i.e. the later insertion
            let next = self
                .sessions
                .iter()
                .max_by_key(|s| s.created_at())
                .map(|s| s.id().to_string());
            self.set_active(next);
        }
    }

    /// Point at an existing session. Unknown ids are ignored.
    pub fn select_session(&mut self, id: &str) {
        if self.session(id).is_some() {
            self.set_active(Some(id.to_string()));
        }
    }

    pub fn rename_session(&mut self, id: &str, new_title: &str) {
        if let Some(session) = self.session_mut(id) {
            session.title = new_title.to_string();
        }
    }

    /// All sessions, most recently created first. Ties keep insertion order.
    pub fn sorted_sessions(&self) -> Vec<&ChatSession> {
        let mut sorted: Vec<&ChatSession> = self.sessions.iter().collect();
        sorted.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        sorted
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    pub fn active_messages(&self) -> &[ChatMessage] {
        self.active_session()
            .map(|s| s.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub(crate) fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    /// Append to the active transcript; dropped when nothing is active.
    pub fn add_message(&mut self, message: ChatMessage) {
        if let Some(id) = self.active_session_id.clone() {
            if let Some(session) = self.session_mut(&id) {
                session.messages.push(message);
            }
        }
    }

    pub fn clear_active_messages(&mut self) {
        if let Some(id) = self.active_session_id.clone() {
            if let Some(session) = self.session_mut(&id) {
                session.messages.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session and clear the pointer.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.set_active(None);
    }

    fn set_active(&mut self, next: Option<String>) {
        if self.active_session_id == next {
            return;
        }
        let previous = std::mem::replace(&mut self.active_session_id, next.clone());
        // no subscribers is fine
        let _ = self.events.send(SessionEvent::ActiveChanged {
            previous,
            current: next,
        });
    }
}
