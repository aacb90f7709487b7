//! Obscura LMS client library
//!
//! Headless state and sync layer for three front-ends: a public course
//! catalog read from a spreadsheet, and an admin console and student
//! portal backed by a hosted Supabase project (auth, tables, realtime).
//!
//! Every app receives its backend as an explicit [`Backend`] handle, so
//! tests substitute [`memory::MemoryBackend`] for [`SupabaseBackend`].

pub mod admin;
pub mod auth;
pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod memory;
pub mod models;
pub mod postgrest;
pub mod realtime;
pub mod student;
pub mod sync;
pub mod watermark;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::auth::{Auth, AuthStateChange, Session, SignUpResponse};
use crate::config::{ClientOptions, SupabaseConfig};
use crate::postgrest::{Filter, PostgrestClient};
use crate::realtime::{ChangeCallback, ChannelHandle, ChannelSpec, RealtimeClient};

pub use crate::backend::Backend;
pub use crate::error::Error;

/// The hosted backend: auth, PostgREST and realtime of one project
pub struct SupabaseBackend {
    /// The base URL for the project
    url: String,
    /// The anonymous API key for the project
    key: String,
    /// HTTP client used for requests
    http_client: Client,
    /// Auth client holding the session
    auth: Auth,
    /// Shared realtime socket
    realtime: RealtimeClient,
    /// Client options
    options: ClientOptions,
}

impl SupabaseBackend {
    /// Create a new client without touching the network
    pub fn new(config: &SupabaseConfig, options: ClientOptions) -> Result<Self, Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;
        let url = config.base_url();

        let auth = Auth::new(&url, &config.anon_key, http_client.clone(), options.clone());
        let realtime = RealtimeClient::new(&url, &config.anon_key, options.heartbeat_interval);

        Ok(Self {
            url,
            key: config.anon_key.clone(),
            http_client,
            auth,
            realtime,
            options,
        })
    }

    /// Create a client and check that the project answers.
    ///
    /// This is the loader handed to [`bootstrap::Bootstrap::load`].
    pub async fn connect(config: &SupabaseConfig, options: ClientOptions) -> Result<Self, Error> {
        let backend = Self::new(config, options)?;
        backend
            .auth
            .health()
            .await
            .map_err(|e| Error::Bootstrap(format!("auth service unreachable: {}", e)))?;
        log::info!("connected to {}", backend.url);
        Ok(backend)
    }

    /// Get a reference to the auth client
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Get a reference to the realtime client
    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Create a PostgrestClient for one table, authorized as the current user
    pub fn from(&self, table: &str) -> PostgrestClient {
        PostgrestClient::new(
            &self.url,
            &self.key,
            table,
            &self.options.db_schema,
            self.auth.access_token(),
            self.http_client.clone(),
        )
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse, Error> {
        self.auth.sign_up(email, password).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        self.auth.sign_in_with_password(email, password).await
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.auth.sign_out().await
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        self.auth.get_session().await
    }

    fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.auth.store().watch()
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.auth.store().events()
    }

    async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, Error> {
        self.from(table).select("*").filters(filters).execute::<Value>().await
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Vec<Value>, Error> {
        self.from(table).insert(record).execute().await
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<Vec<Value>, Error> {
        let client = self.from(table);
        let mut builder = client.update(patch);
        for filter in filters {
            builder.filter(filter);
        }
        builder.execute().await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), Error> {
        let client = self.from(table);
        let mut builder = client.delete();
        for filter in filters {
            builder.filter(filter);
        }
        builder.execute().await
    }

    async fn subscribe(&self, spec: ChannelSpec, callback: ChangeCallback) -> Result<ChannelHandle, Error> {
        self.realtime
            .subscribe(spec, callback, self.auth.access_token())
            .await
    }

    async fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), Error> {
        self.realtime.unsubscribe(handle).await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::admin::AdminApp;
    pub use crate::backend::Backend;
    pub use crate::bootstrap::{Bootstrap, BootstrapState};
    pub use crate::catalog::CatalogView;
    pub use crate::config::{ClientOptions, SheetsConfig, SupabaseConfig};
    pub use crate::error::Error;
    pub use crate::student::StudentApp;
    pub use crate::SupabaseBackend;
}
