//! HTTP client for the replicated store
//!
//! Speaks the rqlite data API: parameterized statements are sent as JSON
//! arrays of `[sql, arg, ...]` to `/db/execute` and `/db/query`, and the
//! cluster leader is read from `/status`.

use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, error};
use url::Url;

use crate::errors::AgentError;

/// A parameterized SQL statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Bind the next positional `?` argument
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

impl Serialize for Statement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.args.len() + 1))?;
        seq.serialize_element(&self.sql)?;
        for arg in &self.args {
            seq.serialize_element(arg)?;
        }
        seq.end()
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    results: Vec<ExecuteResult>,
}

/// Outcome of one write statement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub rows_affected: u64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

/// Columnar result of one read statement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResult {
    /// Decode each row into `T` by matching column names to field names
    pub fn into_rows<T: DeserializeOwned>(self) -> Result<Vec<T>, AgentError> {
        if let Some(err) = self.error {
            return Err(AgentError::StoreError(err));
        }

        let columns = self.columns;
        self.values
            .into_iter()
            .map(|row| {
                let object: Map<String, Value> = columns
                    .iter()
                    .cloned()
                    .zip(row)
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                serde_json::from_value(Value::Object(object)).map_err(AgentError::from)
            })
            .collect()
    }
}

/// HTTP client for store communication
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    pub async fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Run write statements, returning one result per statement
    pub async fn execute(&self, statements: &[Statement]) -> Result<Vec<ExecuteResult>, AgentError> {
        let url = self.base_url.join("db/execute")?;
        debug!("POST {} ({} statements)", url, statements.len());

        let response = self.client.post(url).json(statements).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Store execute failed: {} - {}", status, body);
            return Err(AgentError::StoreError(format!("{}: {}", status, body)));
        }

        let body: ExecuteResponse = response.json().await?;
        if let Some(err) = body.results.iter().find_map(|r| r.error.clone()) {
            return Err(AgentError::StoreError(err));
        }
        Ok(body.results)
    }

    /// Run one read statement
    pub async fn query(&self, statement: &Statement) -> Result<QueryResult, AgentError> {
        let mut url = self.base_url.join("db/query")?;
        url.query_pairs_mut().append_pair("level", "strong");
        debug!("POST {} {}", url, statement.sql);

        let response = self
            .client
            .post(url)
            .json(&[statement])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Store query failed: {} - {}", status, body);
            return Err(AgentError::StoreError(format!("{}: {}", status, body)));
        }

        let body: QueryResponse = response.json().await?;
        body.results
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::StoreError("empty query response".to_string()))
    }

    /// Address of the current cluster leader, if one is elected
    pub async fn leader(&self) -> Result<Option<String>, AgentError> {
        let url = self.base_url.join("status")?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let status: Value = response.json().await?;
        Ok(parse_leader(&status))
    }
}

fn parse_leader(status: &Value) -> Option<String> {
    let leader = status.get("store")?.get("leader")?;
    let addr = match leader {
        Value::String(addr) => addr.as_str(),
        Value::Object(obj) => obj.get("addr")?.as_str()?,
        _ => return None,
    };
    (!addr.is_empty()).then(|| addr.to_string())
}
