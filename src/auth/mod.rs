//! Authentication against the hosted auth service

mod types;
mod session;

use reqwest::Client;
use serde_json::json;

use crate::config::ClientOptions;
use crate::error::Error;
use crate::fetch::Fetch;

pub use types::*;
pub use session::*;

/// Client for the auth service
pub struct Auth {
    /// The base URL for the project
    url: String,

    /// The anonymous API key for the project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session
    store: SessionStore,

    /// Client options
    options: ClientOptions,
}

/// Re-labels a non-success response as an auth error with the raw message.
fn auth_error(err: Error) -> Error {
    match err {
        Error::Api { message, .. } => Error::Auth(message),
        other => other,
    }
}

impl Auth {
    /// Create a new Auth client
    pub(crate) fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            store: SessionStore::new(),
            options,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// The session store backing this client
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The access token of the current session, if any
    pub fn access_token(&self) -> Option<String> {
        self.store.get().map(|s| s.access_token)
    }

    /// Sign up a new user with email and password
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse, Error> {
        let url = self.get_auth_url("/signup");

        let value = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .json(&json!({ "email": email, "password": password }))?
            .execute::<serde_json::Value>()
            .await
            .map_err(auth_error)?;

        let response = SignUpResponse::from_value(value)?;
        if let Some(ref session) = response.session {
            self.store.set(AuthChangeEvent::SignedIn, session.clone());
        }
        log::info!(
            "signed up {} (session opened: {})",
            email,
            response.session.is_some()
        );

        Ok(response)
    }

    /// Sign in a user with email and password
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let url = self.get_auth_url("/token");

        let session = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .query([("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))?
            .execute::<Session>()
            .await
            .map_err(auth_error)?
            .with_expiry();

        self.store.set(AuthChangeEvent::SignedIn, session.clone());
        log::info!("signed in user {}", session.user.id);
        Ok(session)
    }

    /// Exchange the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session, Error> {
        let refresh_token = match self.store.get() {
            Some(session) if !session.refresh_token.is_empty() => session.refresh_token,
            _ => return Err(Error::auth("Auth session missing!")),
        };
        let url = self.get_auth_url("/token");

        let session = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .query([("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))?
            .execute::<Session>()
            .await
            .map_err(auth_error)?
            .with_expiry();

        self.store.set(AuthChangeEvent::TokenRefreshed, session.clone());
        Ok(session)
    }

    /// Sign out the current user.
    ///
    /// The local session is dropped even when the remote call fails; an
    /// already-revoked token is not an error.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let token = match self.access_token() {
            Some(token) => token,
            None => return Ok(()),
        };
        let url = self.get_auth_url("/logout");

        let result = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .bearer_auth(&token)
            .execute_empty()
            .await;

        self.store.clear();

        match result {
            Err(Error::Api { status: 401 | 403 | 404, .. }) => Ok(()),
            other => other.map_err(auth_error),
        }
    }

    /// Get the current session.
    ///
    /// An expired session is refreshed when `auto_refresh_token` is set;
    /// when it cannot be refreshed the session is cleared.
    pub async fn get_session(&self) -> Result<Option<Session>, Error> {
        let session = match self.store.get() {
            Some(session) => session,
            None => return Ok(None),
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        if self.options.auto_refresh_token {
            match self.refresh_session().await {
                Ok(session) => return Ok(Some(session)),
                Err(e) => log::warn!("session refresh failed: {}", e),
            }
        }
        self.store.clear();
        Ok(None)
    }

    /// Check that the auth service answers
    pub async fn health(&self) -> Result<(), Error> {
        let url = self.get_auth_url("/health");
        Fetch::get(&self.client, &url)
            .header("apikey", &self.key)
            .execute_empty()
            .await
    }
}
