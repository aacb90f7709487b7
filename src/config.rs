//! Configuration for the backend client and the catalog spreadsheet source

use std::time::Duration;
use url::Url;

use crate::error::Error;

/// Default cell range read by the catalog viewer
pub const DEFAULT_SHEETS_RANGE: &str = "Lessons!A2:F100";

/// Default base URL of the spreadsheet read API
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Tuning options for the backend client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether an expired session is refreshed on `get_session`
    pub auto_refresh_token: bool,

    /// The request timeout for HTTP calls
    pub request_timeout: Option<Duration>,

    /// The database schema used for queries and change feeds
    pub db_schema: String,

    /// Interval between realtime heartbeats
    pub heartbeat_interval: Duration,

    /// Upper bound for bringing the backend client up
    pub bootstrap_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            bootstrap_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientOptions {
    /// Set whether to automatically refresh the token
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the realtime heartbeat interval
    pub fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    /// Set the bootstrap timeout
    pub fn with_bootstrap_timeout(mut self, value: Duration) -> Self {
        self.bootstrap_timeout = value;
        self
    }
}

/// Connection settings for the hosted backend
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: Url,
    pub anon_key: String,
}

impl SupabaseConfig {
    /// Creates a new configuration, validating the URL and key.
    pub fn new(url: &str, anon_key: &str) -> Result<Self, Error> {
        let url = Url::parse(url)?;
        if anon_key.is_empty() {
            return Err(Error::config("anon_key cannot be empty"));
        }
        Ok(Self {
            url,
            anon_key: anon_key.to_string(),
        })
    }

    /// Loads the configuration from `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        load_dotenv();
        let url = require_var("SUPABASE_URL")?;
        let anon_key = require_var("SUPABASE_ANON_KEY")?;
        Self::new(&url, &anon_key)
    }

    /// The project URL without a trailing slash.
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

/// Where the public catalog reads its rows from
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub api_key: String,
    pub range: String,
    pub base_url: String,
}

impl SheetsConfig {
    pub fn new(spreadsheet_id: &str, api_key: &str) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.to_string(),
            api_key: api_key.to_string(),
            range: DEFAULT_SHEETS_RANGE.to_string(),
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
        }
    }

    /// Set the cell range
    pub fn with_range(mut self, range: &str) -> Self {
        self.range = range.to_string();
        self
    }

    /// Point the client at a different API host
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Loads `SHEETS_SPREADSHEET_ID`, `SHEETS_API_KEY` and the optional
    /// `SHEETS_RANGE`.
    pub fn from_env() -> Result<Self, Error> {
        load_dotenv();
        let spreadsheet_id = require_var("SHEETS_SPREADSHEET_ID")?;
        let api_key = require_var("SHEETS_API_KEY")?;
        let mut config = Self::new(&spreadsheet_id, &api_key);
        if let Ok(range) = std::env::var("SHEETS_RANGE") {
            config = config.with_range(&range);
        }
        Ok(config)
    }
}

fn load_dotenv() {
    // Tests stay hermetic.
    if !cfg!(test) {
        dotenv::dotenv().ok();
    }
}

fn require_var(name: &str) -> Result<String, Error> {
    std::env::var(name)
        .map_err(|_| Error::config(format!("{} environment variable not found", name)))
}
