//! Read-only client for the spreadsheet values API

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::SheetsConfig;
use crate::error::Error;
use crate::fetch::Fetch;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Option<Vec<Vec<Value>>>,
}

/// Fetches one fixed cell range
pub struct SheetsClient {
    config: SheetsConfig,
    client: Client,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn with_client(config: SheetsConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &SheetsConfig {
        &self.config
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}`, the range percent-encoded
    pub fn values_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.config.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("{} cannot be a base URL", self.config.base_url)))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.config.spreadsheet_id.as_str(),
                "values",
                self.config.range.as_str(),
            ]);
        Ok(url)
    }

    /// The rows of the range, every cell as text.
    ///
    /// A response without a `values` array, or with an empty one, is an
    /// error.
    pub async fn fetch_values(&self) -> Result<Vec<Vec<String>>, Error> {
        let url = self.values_url()?;
        let range: ValueRange = Fetch::get(&self.client, url.as_str())
            .query([("key", self.config.api_key.as_str())])
            .execute()
            .await
            .map_err(|e| match e {
                Error::Api { status, message } => Error::sheets(format!("{} ({})", message, status)),
                other => other,
            })?;

        let rows = range.values.unwrap_or_default();
        if rows.is_empty() {
            return Err(Error::sheets(format!("no data found in {}", self.config.range)));
        }
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
