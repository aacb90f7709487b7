//! Request builders for table reads and writes

use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::Error;
use crate::fetch::{Fetch, FetchBuilder};
use crate::postgrest::filter::Filter;

/// Connection details shared by every builder of one table client
#[derive(Clone)]
pub(crate) struct Target {
    pub(crate) url: String,
    pub(crate) key: String,
    pub(crate) token: String,
    pub(crate) schema: String,
    pub(crate) client: Client,
}

impl Target {
    fn authorize<'a>(&self, fetch: FetchBuilder<'a>) -> FetchBuilder<'a> {
        fetch
            .header("apikey", &self.key)
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
            .bearer_auth(&self.token)
    }
}

/// Re-labels a non-success response as a database error with the raw message.
fn database_error(err: Error) -> Error {
    match err {
        Error::Api { message, .. } => Error::Database(message),
        other => other,
    }
}

/// Builder for SELECT queries
pub struct SelectBuilder {
    target: Target,
    params: Vec<(String, String)>,
}

impl SelectBuilder {
    pub(crate) fn new(target: Target, columns: &str) -> Self {
        Self {
            target,
            params: vec![("select".to_string(), columns.to_string())],
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(&mut self, column: &str, value: T) -> &mut Self {
        self.filter(&Filter::eq(column, value))
    }

    /// Add an arbitrary filter
    pub fn filter(&mut self, filter: &Filter) -> &mut Self {
        self.params.push(filter.to_query_pair());
        self
    }

    /// Add several filters
    pub fn filters(&mut self, filters: &[Filter]) -> &mut Self {
        for filter in filters {
            self.filter(filter);
        }
        self
    }

    /// Limit the number of rows returned
    pub fn limit(&mut self, count: usize) -> &mut Self {
        self.params.push(("limit".to_string(), count.to_string()));
        self
    }

    /// Execute the query and return the results in backend order
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
        let fetch = Fetch::get(&self.target.client, &self.target.url).query(self.params.clone());
        self.target
            .authorize(fetch)
            .execute::<Vec<T>>()
            .await
            .map_err(database_error)
    }

    /// Execute the query and return the first row
    pub async fn execute_one<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Error> {
        self.limit(1);
        let rows = self.execute::<T>().await?;
        Ok(rows.into_iter().next())
    }
}

/// Builder for INSERT queries
pub struct InsertBuilder<T: Serialize> {
    target: Target,
    values: T,
}

impl<T: Serialize> InsertBuilder<T> {
    pub(crate) fn new(target: Target, values: T) -> Self {
        Self { target, values }
    }

    /// Execute the insert and return the stored rows
    pub async fn execute(&self) -> Result<Vec<Value>, Error> {
        let fetch = Fetch::post(&self.target.client, &self.target.url)
            .header("Prefer", "return=representation")
            .json(&self.values)?;
        self.target
            .authorize(fetch)
            .execute::<Vec<Value>>()
            .await
            .map_err(database_error)
    }
}

/// Builder for UPDATE queries
pub struct UpdateBuilder<T: Serialize> {
    target: Target,
    values: T,
    params: Vec<(String, String)>,
}

impl<T: Serialize> UpdateBuilder<T> {
    pub(crate) fn new(target: Target, values: T) -> Self {
        Self {
            target,
            values,
            params: Vec::new(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<V: ToString>(&mut self, column: &str, value: V) -> &mut Self {
        self.filter(&Filter::eq(column, value))
    }

    /// Add an arbitrary filter
    pub fn filter(&mut self, filter: &Filter) -> &mut Self {
        self.params.push(filter.to_query_pair());
        self
    }

    /// Execute the update and return the changed rows
    pub async fn execute(&self) -> Result<Vec<Value>, Error> {
        let fetch = Fetch::patch(&self.target.client, &self.target.url)
            .header("Prefer", "return=representation")
            .query(self.params.clone())
            .json(&self.values)?;
        self.target
            .authorize(fetch)
            .execute::<Vec<Value>>()
            .await
            .map_err(database_error)
    }
}

/// Builder for DELETE queries
pub struct DeleteBuilder {
    target: Target,
    params: Vec<(String, String)>,
}

impl DeleteBuilder {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target,
            params: Vec::new(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<V: ToString>(&mut self, column: &str, value: V) -> &mut Self {
        self.filter(&Filter::eq(column, value))
    }

    /// Add an arbitrary filter
    pub fn filter(&mut self, filter: &Filter) -> &mut Self {
        self.params.push(filter.to_query_pair());
        self
    }

    /// Execute the delete without returning the removed rows
    pub async fn execute(&self) -> Result<(), Error> {
        let fetch = Fetch::delete(&self.target.client, &self.target.url)
            .header("Prefer", "return=minimal")
            .query(self.params.clone());
        self.target
            .authorize(fetch)
            .execute_empty()
            .await
            .map_err(database_error)
    }
}
