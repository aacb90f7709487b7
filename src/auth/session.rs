//! Session data and the in-process session store

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};

use super::types::{AuthChangeEvent, AuthStateChange, User};

/// Session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    #[serde(default)]
    pub refresh_token: String,

    /// The token type
    #[serde(default = "bearer")]
    pub token_type: String,

    /// The lifetime in seconds
    #[serde(default)]
    pub expires_in: i64,

    /// The expiry timestamp (unix seconds)
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The signed-in identity
    pub user: User,
}

fn bearer() -> String {
    "bearer".to_string()
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

impl Session {
    /// Create a new session expiring `expires_in` seconds from now
    pub fn new(access_token: &str, refresh_token: &str, user: User, expires_in: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            token_type: bearer(),
            expires_in,
            expires_at: Some(now_secs() + expires_in),
            user,
        }
    }

    /// Fills in `expires_at` from `expires_in` when the service omitted it.
    pub fn with_expiry(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(now_secs() + self.expires_in);
        }
        self
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => now_secs() >= expires_at,
            None => false,
        }
    }
}

/// Holds the current session and fans out changes.
///
/// The `watch` side gives a synchronous view of the current session; the
/// `broadcast` side carries the individual events for
/// `on_auth_state_change` listeners.
#[derive(Debug, Clone)]
pub struct SessionStore {
    current: watch::Sender<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        let (events, _) = broadcast::channel(32);
        Self { current, events }
    }

    /// The current session, if any
    pub fn get(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    /// Replace the session and notify listeners
    pub fn set(&self, event: AuthChangeEvent, session: Session) {
        self.current.send_replace(Some(session.clone()));
        self.notify(event, Some(session));
    }

    /// Drop the session; listeners are only told if there was one.
    pub fn clear(&self) {
        if self.current.send_replace(None).is_some() {
            self.notify(AuthChangeEvent::SignedOut, None);
        }
    }

    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }

    fn notify(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No listeners is fine.
        let _ = self.events.send(AuthStateChange { event, session });
    }
}
