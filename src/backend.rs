//! The service handle every app is constructed with.
//!
//! Apps never reach for a global client; they receive an
//! `Arc<dyn Backend>`, which is either the hosted service
//! ([`SupabaseBackend`](crate::SupabaseBackend)) or the in-memory fake
//! ([`MemoryBackend`](crate::memory::MemoryBackend)).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::auth::{AuthChangeEvent, AuthStateChange, Session, SignUpResponse};
use crate::error::Error;
use crate::postgrest::Filter;
use crate::realtime::{ChangeCallback, ChannelHandle, ChannelSpec};

#[async_trait]
pub trait Backend: Send + Sync {
    // --- Auth ---
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse, Error>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error>;

    async fn sign_out(&self) -> Result<(), Error>;

    /// The current session, refreshed or cleared if it has expired
    async fn get_session(&self) -> Result<Option<Session>, Error>;

    /// Synchronous view of the current session
    fn session_changes(&self) -> watch::Receiver<Option<Session>>;

    /// Individual session events, in order
    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange>;

    // --- Data ---
    async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, Error>;

    async fn insert(&self, table: &str, record: Value) -> Result<Vec<Value>, Error>;

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<Vec<Value>, Error>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), Error>;

    // --- Realtime ---
    async fn subscribe(&self, spec: ChannelSpec, callback: ChangeCallback) -> Result<ChannelHandle, Error>;

    async fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), Error>;

    /// Calls `callback` for every session change until the returned
    /// subscription is dropped or unsubscribed.
    fn on_auth_state_change<F>(&self, callback: F) -> AuthSubscription
    where
        F: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
        Self: Sized,
    {
        AuthSubscription::spawn(self.auth_events(), callback)
    }
}

impl dyn Backend {
    /// `on_auth_state_change` for a shared `Arc<dyn Backend>`
    pub fn on_auth_state_change<F>(&self, callback: F) -> AuthSubscription
    where
        F: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
    {
        AuthSubscription::spawn(self.auth_events(), callback)
    }
}

/// Listener registration returned by `on_auth_state_change`
pub struct AuthSubscription {
    task: JoinHandle<()>,
}

impl AuthSubscription {
    pub fn spawn<F>(mut events: broadcast::Receiver<AuthStateChange>, callback: F) -> Self
    where
        F: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => callback(change.event, change.session),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("auth listener skipped {} session events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
