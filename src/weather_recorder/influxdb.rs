// weather_recorder - Record current weather observations into InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Minimal client for the InfluxDB 1.x HTTP API.
//!
//! Only what's needed to make sure a database exists and to write points to it
//! is supported: `SHOW DATABASES` and `CREATE DATABASE` via `/query`, and line
//! protocol batches via `/write`.

use crate::points::Point;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Internal(reqwest::Error),
    InvalidUrl(String, String),
    Unexpected(StatusCode, String),
    Decode(serde_json::Error),
    Query(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(url, e) => write!(f, "invalid URL {}: {}", url, e),
            Self::Unexpected(status, body) => write!(f, "unexpected status {}: {}", status, body.trim()),
            Self::Decode(e) => write!(f, "unable to decode response: {}", e),
            Self::Query(e) => write!(f, "query failed: {}", e),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Internal(e)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct QueryResult {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

impl QueryResponse {
    /// First error reported at the top level or by any statement.
    fn error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }

    /// Database names from the result of a `SHOW DATABASES` query.
    pub fn database_names(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.series.iter())
            .filter(|s| s.name == "databases")
            .flat_map(|s| {
                let col = s.columns.iter().position(|c| c == "name").unwrap_or(0);
                s.values.iter().filter_map(move |row| row.get(col).and_then(Value::as_str))
            })
            .map(String::from)
            .collect()
    }
}

#[derive(Debug)]
pub struct InfluxClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
}

impl InfluxClient {
    pub fn new<S: Into<String>>(client: Client, address: &str, port: u16, user: S, password: S) -> Result<Self, StoreError> {
        let raw = format!("http://{}:{}/", address, port);
        let base_url = Url::parse(&raw).map_err(|e| StoreError::InvalidUrl(raw, e.to_string()))?;

        Ok(InfluxClient {
            client,
            base_url,
            user: user.into(),
            password: password.into(),
        })
    }

    /// Names of all databases that currently exist.
    pub async fn databases(&self) -> Result<Vec<String>, StoreError> {
        let req = self.client.get(self.endpoint("query")).query(&[("q", "SHOW DATABASES")]);
        let res = self.query(req).await?;
        Ok(res.database_names())
    }

    pub async fn create_database(&self, name: &str) -> Result<(), StoreError> {
        let statement = format!("CREATE DATABASE {}", quote_ident(name));
        let req = self.client.post(self.endpoint("query")).query(&[("q", statement)]);
        self.query(req).await?;
        Ok(())
    }

    /// Create the database `name` unless it already exists.
    ///
    /// Returns `true` if the database had to be created.
    pub async fn ensure_database(&self, name: &str) -> Result<bool, StoreError> {
        if self.databases().await?.iter().any(|db| db == name) {
            return Ok(false);
        }

        tracing::info!(message = "creating database", database = %name);
        self.create_database(name).await?;
        Ok(true)
    }

    /// Write all points to the database `name` in a single request.
    pub async fn write_points(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let payload = points.iter().map(Point::to_line_protocol).collect::<Vec<_>>().join("\n");
        tracing::debug!(message = "writing points", database = %name, num_points = points.len());

        let res = self
            .client
            .post(self.endpoint("write"))
            .query(&[("db", name)])
            .basic_auth(&self.user, Some(&self.password))
            .body(payload)
            .send()
            .await?;

        match res.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            status => {
                let body = res.text().await.unwrap_or_else(|e| format!("[response decode error: {}]", e));
                Err(StoreError::Unexpected(status, body))
            }
        }
    }

    async fn query(&self, req: RequestBuilder) -> Result<QueryResponse, StoreError> {
        let res = req.basic_auth(&self.user, Some(&self.password)).send().await?;
        let status = res.status();
        let body = res.text().await?;

        if status != StatusCode::OK {
            return Err(StoreError::Unexpected(status, body));
        }

        let parsed: QueryResponse = serde_json::from_str(&body).map_err(StoreError::Decode)?;
        match parsed.error() {
            Some(e) => Err(StoreError::Query(e.to_owned())),
            None => Ok(parsed),
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::{quote_ident, InfluxClient, QueryResponse};
    use reqwest::Client;

    #[test]
    fn test_quote_ident() {
        assert_eq!("\"weather\"", quote_ident("weather"));
        assert_eq!("\"we\\\"ird\"", quote_ident("we\"ird"));
    }

    #[test]
    fn test_database_names() {
        let body = r#"{"results":[{"statement_id":0,"series":[{"name":"databases","columns":["name"],"values":[["_internal"],["weather"]]}]}]}"#;
        let res: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(vec!["_internal".to_owned(), "weather".to_owned()], res.database_names());
        assert_eq!(None, res.error());
    }

    #[test]
    fn test_database_names_empty() {
        let res: QueryResponse = serde_json::from_str(r#"{"results":[{"statement_id":0}]}"#).unwrap();
        assert!(res.database_names().is_empty());
    }

    #[test]
    fn test_query_error() {
        let res: QueryResponse =
            serde_json::from_str(r#"{"results":[{"statement_id":0,"error":"database name required"}]}"#).unwrap();
        assert_eq!(Some("database name required"), res.error());
    }

    #[test]
    fn test_endpoint() {
        let client = InfluxClient::new(Client::new(), "influxdb", 8086, "root", "root").unwrap();
        assert_eq!("http://influxdb:8086/write", client.endpoint("write").as_str());
    }

    #[test]
    fn test_invalid_address() {
        assert!(InfluxClient::new(Client::new(), "bad host name", 8086, "root", "root").is_err());
    }
}
