//! Table operations through the PostgREST API

mod query;
mod filter;

use reqwest::Client;
use serde::Serialize;

pub use query::*;
pub use filter::*;

/// Client for operations on one table
pub struct PostgrestClient {
    target: query::Target,
}

impl PostgrestClient {
    /// Create a new PostgrestClient.
    ///
    /// `token` is the signed-in user's access token; without one the
    /// anonymous key is sent as the bearer.
    pub(crate) fn new(
        url: &str,
        key: &str,
        table: &str,
        schema: &str,
        token: Option<String>,
        client: Client,
    ) -> Self {
        Self {
            target: query::Target {
                url: format!("{}/rest/v1/{}", url, table),
                key: key.to_string(),
                token: token.unwrap_or_else(|| key.to_string()),
                schema: schema.to_string(),
                client,
            },
        }
    }

    /// Select specific columns from the table
    pub fn select(&self, columns: &str) -> SelectBuilder {
        SelectBuilder::new(self.target.clone(), columns)
    }

    /// Insert data into the table
    pub fn insert<T: Serialize>(&self, values: T) -> InsertBuilder<T> {
        InsertBuilder::new(self.target.clone(), values)
    }

    /// Update data in the table
    pub fn update<T: Serialize>(&self, values: T) -> UpdateBuilder<T> {
        UpdateBuilder::new(self.target.clone(), values)
    }

    /// Delete data from the table
    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.target.clone())
    }
}
