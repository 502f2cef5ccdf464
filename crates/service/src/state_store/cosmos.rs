//! REST client for a Cosmos-style document database authenticated with a
//! base64 master key.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use configs::StateStoreConfig;
use reqwest::{Method, StatusCode};
use ring::hmac;
use tracing::{debug, instrument};

use super::{DatabaseStatus, DocumentDbClient, StateStoreError};

const API_VERSION: &str = "2018-12-31";

pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: String,
    key: hmac::Key,
}

impl CosmosClient {
    /// Build the client and read the database account to check connectivity.
    pub async fn connect(cfg: &StateStoreConfig) -> Result<Self, StateStoreError> {
        let client = Self::new(cfg)?;
        client.read_account().await?;
        Ok(client)
    }

    pub fn new(cfg: &StateStoreConfig) -> Result<Self, StateStoreError> {
        let raw = general_purpose::STANDARD
            .decode(cfg.key.trim())
            .map_err(|e| StateStoreError::InvalidKey(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| StateStoreError::Request(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim().trim_end_matches('/').to_string(),
            key: hmac::Key::new(hmac::HMAC_SHA256, &raw),
        })
    }

    async fn read_account(&self) -> Result<(), StateStoreError> {
        let res = self.send(Method::GET, "", "", "", None).await?;
        if !res.status().is_success() {
            return Err(status_error(res).await);
        }
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        resource_type: &str,
        resource_link: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, StateStoreError> {
        let date = rfc1123_now();
        let token = auth_token(&self.key, method.as_str(), resource_type, resource_link, &date);
        let url = format!("{}/{}", self.endpoint, path);
        let mut req = self
            .http
            .request(method, url)
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION);
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.map_err(|e| StateStoreError::Request(e.to_string()))
    }
}

#[async_trait]
impl DocumentDbClient for CosmosClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip(self))]
    async fn create_database_if_not_exists(&self, id: &str) -> Result<DatabaseStatus, StateStoreError> {
        let res = self
            .send(Method::POST, "dbs", "dbs", "", Some(serde_json::json!({ "id": id })))
            .await?;
        match res.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(DatabaseStatus::Created),
            StatusCode::CONFLICT => {
                debug!(%id, "database already exists");
                Ok(DatabaseStatus::AlreadyExists)
            }
            _ => Err(status_error(res).await),
        }
    }

    async fn database_exists(&self, id: &str) -> Result<bool, StateStoreError> {
        let link = format!("dbs/{id}");
        let res = self.send(Method::GET, &link, "dbs", &link, None).await?;
        match res.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(res).await),
        }
    }
}

async fn status_error(res: reqwest::Response) -> StateStoreError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    StateStoreError::Status { status, body }
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Master-key authorization header value.
///
/// Signs `verb\ntype\nlink\ndate\n\n` (verb, type and date lowercased) with
/// HMAC-SHA256 and percent-encodes the resulting `type=master&ver=1.0&sig=..`.
pub fn auth_token(key: &hmac::Key, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let tag = hmac::sign(key, payload.as_bytes());
    let sig = general_purpose::STANDARD.encode(tag.as_ref());
    percent_encode(&format!("type=master&ver=1.0&sig={sig}"))
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::HeaderMap, routing::{get, post}, Json, Router};

    type Dbs = Arc<Mutex<HashSet<String>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
        auth.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D") && headers.contains_key("x-ms-date")
    }

    async fn account(headers: HeaderMap) -> axum::http::StatusCode {
        if authorized(&headers) { axum::http::StatusCode::OK } else { axum::http::StatusCode::UNAUTHORIZED }
    }

    async fn create_db(
        State(dbs): State<Dbs>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> axum::http::StatusCode {
        if !authorized(&headers) {
            return axum::http::StatusCode::UNAUTHORIZED;
        }
        let id = body["id"].as_str().unwrap_or_default().to_string();
        if dbs.lock().unwrap().insert(id) {
            axum::http::StatusCode::CREATED
        } else {
            axum::http::StatusCode::CONFLICT
        }
    }

    async fn start_fake_store() -> anyhow::Result<String> {
        let dbs: Dbs = Arc::default();
        let app = Router::new()
            .route("/", get(account))
            .route("/dbs", post(create_db))
            .with_state(dbs);
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{}/", addr))
    }

    #[test]
    fn token_is_deterministic_and_encoded() {
        let key = hmac::Key::new(hmac::HMAC_SHA256, b"secret");
        let date = "Tue, 01 Nov 1994 08:12:31 GMT";
        let a = auth_token(&key, "GET", "dbs", "dbs/tre", date);
        let b = auth_token(&key, "get", "DBS", "dbs/tre", date);
        assert_eq!(a, b);
        assert!(a.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        assert_ne!(a, auth_token(&key, "POST", "dbs", "", date));
    }

    #[test]
    fn percent_encodes_reserved_bytes() {
        assert_eq!(percent_encode("a+b/c="), "a%2Bb%2Fc%3D");
    }

    #[tokio::test]
    async fn creates_database_once() -> anyhow::Result<()> {
        let endpoint = start_fake_store().await?;
        let cfg = StateStoreConfig { endpoint, key: "c2VjcmV0".into(), ..StateStoreConfig::default() };
        let client = CosmosClient::connect(&cfg).await?;
        assert_eq!(client.create_database_if_not_exists("tre").await?, DatabaseStatus::Created);
        assert_eq!(client.create_database_if_not_exists("tre").await?, DatabaseStatus::AlreadyExists);
        Ok(())
    }

    #[test]
    fn rejects_non_base64_key() {
        let cfg = StateStoreConfig {
            endpoint: "https://example".into(),
            key: "***".into(),
            ..StateStoreConfig::default()
        };
        assert!(matches!(CosmosClient::new(&cfg), Err(StateStoreError::InvalidKey(_))));
    }
}
