//! Key-value table storage swept by the expiry job.
//!
//! [`TableStore`] is the seam the sweeper depends on. Two implementations:
//!
//! - [`MemoryTableStore`]: concurrent map keyed by `(partitionKey, rowKey)`
//! - [`AzureTableStore`]: Azure Table Storage (or Azurite) over REST, signed
//!   with SharedKeyLite and configured from a connection string

use crate::models::TableRow;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::{header::HeaderMap, Client, StatusCode, Url};
use ring::hmac;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Table storage errors
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("row not found")]
    NotFound,

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(&'static str),

    #[error("table request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("table service returned {status}: {body}")]
    Service { status: StatusCode, body: String },

    #[error("table storage error: {0}")]
    Backend(String),
}

/// Full-scan listing and keyed deletion over a table
#[async_trait]
pub trait TableStore: Send + Sync {
    /// List every row currently in the table
    async fn list_rows(&self) -> Result<Vec<TableRow>, TableError>;

    /// Delete one row by its composite key
    async fn delete_row(&self, partition_key: &str, row_key: &str) -> Result<(), TableError>;
}

// ============================================================================
// In-Memory Table
// ============================================================================

/// Thread-safe in-memory table
#[derive(Clone, Default)]
pub struct MemoryTableStore {
    rows: Arc<DashMap<(String, String), TableRow>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn upsert(&self, row: TableRow) {
        self.rows
            .insert((row.partition_key.clone(), row.row_key.clone()), row);
    }

    /// Check if a row exists
    pub fn contains(&self, partition_key: &str, row_key: &str) -> bool {
        self.rows
            .contains_key(&(partition_key.to_string(), row_key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn list_rows(&self) -> Result<Vec<TableRow>, TableError> {
        Ok(self.rows.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn delete_row(&self, partition_key: &str, row_key: &str) -> Result<(), TableError> {
        self.rows
            .remove(&(partition_key.to_string(), row_key.to_string()))
            .map(|_| ())
            .ok_or(TableError::NotFound)
    }
}

// ============================================================================
// Azure Table Storage
// ============================================================================

/// Table service REST API version
const API_VERSION: &str = "2019-02-02";

/// Azurite development account
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

const CONTINUATION_PARTITION: &str = "x-ms-continuation-nextpartitionkey";
const CONTINUATION_ROW: &str = "x-ms-continuation-nextrowkey";

/// Parsed storage account connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub account_name: String,
    pub account_key: Vec<u8>,
    pub table_endpoint: Url,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("table_endpoint", &self.table_endpoint.as_str())
            .finish()
    }
}

impl ConnectionInfo {
    /// Parse `Key=Value;...` connection strings, including
    /// `UseDevelopmentStorage=true`
    pub fn parse(connection_string: &str) -> Result<Self, TableError> {
        let parts: HashMap<String, &str> = connection_string
            .split(';')
            .filter_map(|part| part.split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim()))
            .collect();

        let dev_storage = parts
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let (account_name, account_key) = if dev_storage {
            (DEV_ACCOUNT_NAME.to_string(), DEV_ACCOUNT_KEY)
        } else {
            let name = parts
                .get("accountname")
                .ok_or(TableError::InvalidConnectionString("missing AccountName"))?;
            let key = parts
                .get("accountkey")
                .ok_or(TableError::InvalidConnectionString("missing AccountKey"))?;
            ((*name).to_string(), *key)
        };

        let account_key = base64::engine::general_purpose::STANDARD
            .decode(account_key)
            .map_err(|_| TableError::InvalidConnectionString("AccountKey is not base64"))?;

        let endpoint = match parts.get("tableendpoint") {
            Some(endpoint) => (*endpoint).to_string(),
            None if dev_storage => DEV_TABLE_ENDPOINT.to_string(),
            None => {
                let protocol = parts.get("defaultendpointsprotocol").unwrap_or(&"https");
                let suffix = parts.get("endpointsuffix").unwrap_or(&"core.windows.net");
                format!("{protocol}://{account_name}.table.{suffix}")
            }
        };
        let table_endpoint = Url::parse(&endpoint)
            .map_err(|_| TableError::InvalidConnectionString("invalid table endpoint"))?;

        Ok(Self {
            account_name,
            account_key,
            table_endpoint,
        })
    }
}

#[derive(Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

/// Decode the entities of one listing page, skipping any that are not rows
fn page_rows(entities: Vec<serde_json::Value>) -> Vec<TableRow> {
    entities
        .into_iter()
        .filter_map(|entity| match serde_json::from_value::<TableRow>(entity) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(error = %e, "Skipping malformed table entity");
                None
            }
        })
        .collect()
}

/// Azure Table Storage client for one table
#[derive(Clone)]
pub struct AzureTableStore {
    client: Client,
    account_name: String,
    signing_key: hmac::Key,
    endpoint: Url,
    table_name: String,
}

impl AzureTableStore {
    /// Build a client from a connection string and table name
    pub fn from_connection_string(
        connection_string: &str,
        table_name: &str,
    ) -> Result<Self, TableError> {
        let info = ConnectionInfo::parse(connection_string)?;
        Ok(Self::new(info, table_name, Client::new()))
    }

    pub fn new(info: ConnectionInfo, table_name: &str, client: Client) -> Self {
        Self {
            client,
            signing_key: hmac::Key::new(hmac::HMAC_SHA256, &info.account_key),
            account_name: info.account_name,
            endpoint: info.table_endpoint,
            table_name: table_name.to_string(),
        }
    }

    /// URL for `resource` (e.g. `items()`) under the account endpoint
    fn resource_url(&self, resource: &str) -> Url {
        let mut url = self.endpoint.clone();
        let base = self.endpoint.path().trim_end_matches('/');
        url.set_path(&format!("{base}/{resource}"));
        url
    }

    /// SharedKeyLite authorization for a request to `url` at `date`
    fn authorization(&self, url: &Url, date: &str) -> String {
        let string_to_sign = format!("{date}\n/{}{}", self.account_name, url.path());
        let tag = hmac::sign(&self.signing_key, string_to_sign.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(tag.as_ref());
        format!("SharedKeyLite {}:{signature}", self.account_name)
    }

    fn signed(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let authorization = self.authorization(&url, &date);
        self.client
            .request(method, url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("Accept", "application/json;odata=nometadata")
            .header("DataServiceVersion", "3.0;NetFx")
            .header("MaxDataServiceVersion", "3.0;NetFx")
            .header("Authorization", authorization)
    }

    async fn failure(response: reqwest::Response) -> TableError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return TableError::NotFound;
        }
        let body = response.text().await.unwrap_or_default();
        TableError::Service { status, body }
    }
}

fn continuation(headers: &HeaderMap) -> Option<(String, Option<String>)> {
    let partition = headers.get(CONTINUATION_PARTITION)?.to_str().ok()?.to_string();
    let row = headers
        .get(CONTINUATION_ROW)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Some((partition, row))
}

/// OData key literal: single quotes are doubled
fn key_literal(key: &str) -> String {
    key.replace('\'', "''")
}

#[async_trait]
impl TableStore for AzureTableStore {
    async fn list_rows(&self) -> Result<Vec<TableRow>, TableError> {
        let mut rows = Vec::new();
        let mut next: Option<(String, Option<String>)> = None;

        loop {
            let mut url = self.resource_url(&format!("{}()", self.table_name));
            if let Some((partition, row)) = &next {
                let mut query = url.query_pairs_mut();
                query.append_pair("NextPartitionKey", partition);
                if let Some(row) = row {
                    query.append_pair("NextRowKey", row);
                }
            }

            let response = self.signed(reqwest::Method::GET, url).send().await?;
            if !response.status().is_success() {
                return Err(Self::failure(response).await);
            }

            next = continuation(response.headers());
            let page: EntityPage = response.json().await?;
            let listed = page_rows(page.value);
            debug!(rows = listed.len(), more = next.is_some(), "Listed table page");
            rows.extend(listed);

            if next.is_none() {
                return Ok(rows);
            }
        }
    }

    async fn delete_row(&self, partition_key: &str, row_key: &str) -> Result<(), TableError> {
        let url = self.resource_url(&format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            self.table_name,
            key_literal(partition_key),
            key_literal(row_key)
        ));

        let response = self
            .signed(reqwest::Method::DELETE, url)
            .header("If-Match", "*")
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_lists_and_deletes() {
        let table = MemoryTableStore::new();
        table.upsert(TableRow::new("p", "1"));
        table.upsert(TableRow::new("p", "2").with_expire("2021-01-01T00:00:00Z"));

        let mut rows = table.list_rows().await.unwrap();
        rows.sort_by(|a, b| a.row_key.cmp(&b.row_key));
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1].expire,
            Some(serde_json::json!("2021-01-01T00:00:00Z"))
        );

        table.delete_row("p", "2").await.unwrap();
        assert!(!table.contains("p", "2"));
        assert!(matches!(
            table.delete_row("p", "2").await,
            Err(TableError::NotFound)
        ));
    }

    #[test]
    fn malformed_entities_do_not_spoil_the_page() {
        let rows = page_rows(vec![
            serde_json::json!({"PartitionKey": "p", "RowKey": "a", "Expire": "2021-01-01"}),
            serde_json::json!({"PartitionKey": "p", "RowKey": "b", "Expire": 12345}),
            serde_json::json!({"RowKey": "orphan"}),
            serde_json::json!("not an entity"),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_key, "a");
        assert_eq!(rows[1].expire, Some(serde_json::json!(12345)));
    }

    #[test]
    fn parses_account_connection_string() {
        let info = ConnectionInfo::parse(
            "DefaultEndpointsProtocol=https;AccountName=replays;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();

        assert_eq!(info.account_name, "replays");
        assert_eq!(info.account_key, b"secret");
        assert_eq!(
            info.table_endpoint.as_str(),
            "https://replays.table.core.windows.net/"
        );
    }

    #[test]
    fn parses_development_storage() {
        let info = ConnectionInfo::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(info.account_name, DEV_ACCOUNT_NAME);
        assert_eq!(info.table_endpoint.as_str(), DEV_TABLE_ENDPOINT);
    }

    #[test]
    fn rejects_incomplete_connection_string() {
        assert!(matches!(
            ConnectionInfo::parse("AccountName=x"),
            Err(TableError::InvalidConnectionString("missing AccountKey"))
        ));
        assert!(matches!(
            ConnectionInfo::parse("AccountName=x;AccountKey=***"),
            Err(TableError::InvalidConnectionString(_))
        ));
    }

    #[test]
    fn builds_table_urls_under_endpoint_path() {
        let store = AzureTableStore::from_connection_string("UseDevelopmentStorage=true", "items")
            .unwrap();

        let list = store.resource_url("items()");
        assert_eq!(list.path(), "/devstoreaccount1/items()");

        let delete = store.resource_url(&format!(
            "items(PartitionKey='{}',RowKey='{}')",
            key_literal("o'neil"),
            "r1"
        ));
        assert!(delete.path().starts_with("/devstoreaccount1/items(PartitionKey='o''neil'"));
    }

    #[test]
    fn authorization_is_shared_key_lite() {
        let store = AzureTableStore::from_connection_string(
            "AccountName=acct;AccountKey=c2VjcmV0;TableEndpoint=https://acct.table.core.windows.net",
            "items",
        )
        .unwrap();

        let url = store.resource_url("items()");
        let date = "Mon, 01 Jan 2024 00:00:00 GMT";
        let auth = store.authorization(&url, date);

        let key = hmac::Key::new(hmac::HMAC_SHA256, b"secret");
        let expected = base64::engine::general_purpose::STANDARD
            .encode(hmac::sign(&key, format!("{date}\n/acct/items()").as_bytes()).as_ref());
        assert_eq!(auth, format!("SharedKeyLite acct:{expected}"));
    }
}
