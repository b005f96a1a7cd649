//! Snapshot storage in a remote SQL store reachable only through an HTTP
//! query endpoint (Cloudflare D1 style).
//!
//! Table layout:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS search_index (
//!     id TEXT PRIMARY KEY,
//!     data TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! )
//! ```
//!
//! The blob is stored base64-encoded because the JSON query API has no binary
//! parameter type. The row is overwritten wholesale on every write.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use super::{SnapshotStorage, StorageError};

/// Default table holding index snapshots.
pub const DEFAULT_TABLE: &str = "search_index";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One result row, column name -> value.
pub type Row = Map<String, Value>;

/// Minimal database-style query interface.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError>;
}

/// Query client for a D1-compatible `POST {"sql", "params"}` endpoint.
pub struct HttpQueryClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    sql: &'a str,
    params: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<QueryMessage>,
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    results: Vec<Row>,
}

impl HttpQueryClient {
    /// Every request, connect included, fails with [`StorageError::Http`]
    /// once `timeout` elapses.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token,
        })
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        log::debug!("remote query: {sql}");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&QueryRequest { sql, params });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed = serde_json::from_str::<QueryResponse>(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {text:?}");
            StorageError::Remote(format!("unexpected response ({status}): {err}"))
        })?;

        if !status.is_success() || !parsed.success {
            let reason = parsed
                .errors
                .iter()
                .map(|e| match e.code {
                    Some(code) => format!("{} (code {code})", e.message),
                    None => e.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StorageError::Remote(format!("{status}: {reason}")));
        }

        Ok(parsed
            .result
            .into_iter()
            .flat_map(|result| result.results)
            .collect())
    }
}

/// Stores each snapshot key as a single row of `table`.
pub struct RemoteRowStorage<C: QueryClient> {
    client: C,
    table: String,
    schema: OnceCell<()>,
}

impl<C: QueryClient> RemoteRowStorage<C> {
    /// The table name is interpolated into SQL, so only `[A-Za-z0-9_]` is accepted.
    pub fn new(client: C, table: &str) -> Result<Self, StorageError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StorageError::InvalidKey(table.to_string()));
        }

        Ok(Self {
            client,
            table: table.to_string(),
            schema: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.schema
            .get_or_try_init(|| async {
                let sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} \
                     (id TEXT PRIMARY KEY, data TEXT NOT NULL, updated_at TEXT NOT NULL)",
                    self.table
                );
                self.client.execute(&sql, &[]).await.map(|_| ())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl<C: QueryClient> SnapshotStorage for RemoteRowStorage<C> {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_schema().await?;
        let sql = format!("SELECT 1 AS present FROM {} WHERE id = ?1 LIMIT 1", self.table);
        let rows = self.client.execute(&sql, &[json!(key)]).await?;
        Ok(!rows.is_empty())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_schema().await?;
        let sql = format!("SELECT data FROM {} WHERE id = ?1 LIMIT 1", self.table);
        let rows = self.client.execute(&sql, &[json!(key)]).await?;

        let encoded = rows
            .first()
            .and_then(|row| row.get("data"))
            .and_then(|data| data.as_str())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(STANDARD.decode(encoded)?)
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        let sql = format!(
            "INSERT INTO {} (id, data, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            self.table
        );
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.client
            .execute(&sql, &[json!(key), json!(STANDARD.encode(data)), json!(updated_at)])
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        self.client.execute(&sql, &[json!(key)]).await?;
        Ok(())
    }
}
