//! Types for authentication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::session::Session;

/// User data as returned by the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// The user ID, shared with the profile row
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user's phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// The auth-level role (usually "authenticated"), not the profile role
    #[serde(default)]
    pub role: Option<String>,

    /// The creation time
    #[serde(default)]
    pub created_at: Option<String>,

    /// The app metadata
    #[serde(default)]
    pub app_metadata: HashMap<String, serde_json::Value>,

    /// The user metadata
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

impl User {
    pub fn new(id: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            email: Some(email.to_string()),
            phone: None,
            role: Some("authenticated".to_string()),
            created_at: None,
            app_metadata: HashMap::new(),
            user_metadata: HashMap::new(),
        }
    }
}

/// Result of a sign-up.
///
/// When email confirmation is enabled the service creates the identity
/// without opening a session.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

impl SignUpResponse {
    /// Interprets the three body shapes the sign-up endpoint answers with:
    /// a full session, a bare user, or a `{user, session}` pair.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)?;
            return Ok(Self {
                user: Some(session.user.clone()),
                session: Some(session.with_expiry()),
            });
        }

        if value.get("user").is_some() || value.get("session").is_some() {
            #[derive(Deserialize)]
            struct Pair {
                user: Option<User>,
                session: Option<Session>,
            }
            let pair: Pair = serde_json::from_value(value)?;
            return Ok(Self {
                user: pair.user,
                session: pair.session.map(Session::with_expiry),
            });
        }

        let user: User = serde_json::from_value(value)?;
        Ok(Self {
            user: Some(user),
            session: None,
        })
    }
}

/// What happened to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// A session change notification
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}
