//! Async client for the resource API used by the perf scenarios.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::config::PerfConfig;
use crate::observability;
use crate::retry::{retry_with_policy, RetryPolicy, Retryable};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{method} {path} returned {status}: {body}")]
    Status { method: Method, path: String, status: StatusCode, body: String },
    #[error("response is missing {0}")]
    MissingField(&'static str),
    #[error("operation {path} ended in {status}: {message}")]
    OperationFailed { path: String, status: String, message: String },
    #[error("operation {path} did not finish within {timeout:?}")]
    Timeout { path: String, timeout: Duration },
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_connect() || e.is_timeout(),
            ClientError::Status { status, .. } => matches!(
                *status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ),
            _ => false,
        }
    }
}

const SUCCEEDED: [&str; 2] = ["deployed", "deleted"];
const FAILED: [&str; 3] = ["deployment_failed", "update_failed", "deletion_failed"];

pub struct ResourceApiClient {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    operation_timeout: Duration,
    retry: RetryPolicy,
    owner_token: String,
    requests: AtomicU64,
}

impl ResourceApiClient {
    pub fn new(cfg: &PerfConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .build()?;
        let retry = RetryPolicy::new(cfg.retry.max_attempts, cfg.backoff_base(), cfg.backoff_max(), cfg.retry.enabled);
        Ok(Self {
            http,
            base_url: cfg.resource_api_url.trim().trim_end_matches('/').to_string(),
            poll_interval: cfg.poll_interval(),
            operation_timeout: cfg.operation_timeout(),
            retry,
            owner_token: cfg.owner_token().to_string(),
            requests: AtomicU64::new(0),
        })
    }

    /// Requests sent so far, retries included.
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    async fn send(&self, method: Method, path: &str, token: &str, body: Option<&Value>) -> Result<Value, ClientError> {
        retry_with_policy(&self.retry, || {
            let method = method.clone();
            async move {
                self.requests.fetch_add(1, Ordering::Relaxed);
                let mut req = self.http.request(method.clone(), format!("{}{}", self.base_url, path)).bearer_auth(token);
                if let Some(body) = body {
                    req = req.json(body);
                }
                let res = match req.send().await {
                    Ok(res) => res,
                    Err(e) => {
                        observability::REQUESTS_TOTAL.with_label_values(&[method.as_str(), "error"]).inc();
                        return Err(e.into());
                    }
                };
                let status = res.status();
                if !status.is_success() {
                    observability::REQUESTS_TOTAL.with_label_values(&[method.as_str(), "rejected"]).inc();
                    let body = res.text().await.unwrap_or_default();
                    return Err(ClientError::Status { method, path: path.to_string(), status, body });
                }
                observability::REQUESTS_TOTAL.with_label_values(&[method.as_str(), "ok"]).inc();
                Ok::<Value, ClientError>(res.json::<Value>().await?)
            }
        })
        .await
    }

    /// Submit a create (POST) or update (PATCH) and return the resource's
    /// `(resource_path, resource_id)`. With `wait` the call returns only once
    /// the operation has succeeded.
    pub async fn post_resource(
        &self,
        payload: &Value,
        endpoint: &str,
        token: &str,
        method: Method,
        wait: bool,
    ) -> Result<(String, String), ClientError> {
        self.submit(method, endpoint, token, Some(payload), wait).await
    }

    #[instrument(skip_all, fields(%method, %endpoint))]
    async fn submit(
        &self,
        method: Method,
        endpoint: &str,
        token: &str,
        body: Option<&Value>,
        wait: bool,
    ) -> Result<(String, String), ClientError> {
        let res = self.send(method, endpoint, token, body).await?;
        let op = &res["operation"];
        let field = |name: &'static str| op[name].as_str().map(str::to_string).ok_or(ClientError::MissingField(name));
        let resource_path = field("resourcePath")?;
        let resource_id = field("resourceId")?;
        let operation_path = format!("/api{}/operations/{}", resource_path, field("id")?);
        debug!(%operation_path, "operation accepted");

        if wait {
            let done = self.wait_for_operation(&operation_path, token).await?;
            let status = done["status"].as_str().unwrap_or_default();
            if !SUCCEEDED.contains(&status) {
                return Err(ClientError::OperationFailed {
                    path: operation_path,
                    status: status.to_string(),
                    message: done["message"].as_str().unwrap_or_default().to_string(),
                });
            }
        }
        Ok((resource_path, resource_id))
    }

    /// Poll an operation until it reaches a terminal status.
    pub async fn wait_for_operation(&self, operation_path: &str, token: &str) -> Result<Value, ClientError> {
        let deadline = Instant::now() + self.operation_timeout;
        loop {
            let res = self.send(Method::GET, operation_path, token, None).await?;
            let op = res.get("operation").cloned().ok_or(ClientError::MissingField("operation"))?;
            let status = op["status"].as_str().unwrap_or_default();
            if SUCCEEDED.contains(&status) || FAILED.contains(&status) {
                return Ok(op);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { path: operation_path.to_string(), timeout: self.operation_timeout });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Disable the resource, then delete it, waiting on both operations.
    pub async fn disable_and_delete_resource(&self, resource_path: &str, token: &str) -> Result<(), ClientError> {
        self.submit(Method::PATCH, resource_path, token, Some(&json!({ "isEnabled": false })), true)
            .await?;
        self.submit(Method::DELETE, resource_path, token, None, true).await?;
        info!(%resource_path, "resource deleted");
        Ok(())
    }

    /// Token and scope uri to use for calls inside a workspace.
    ///
    /// The scope is the workspace's `scope_id` property, or `api://{client_id}`.
    /// The token is the configured owner token, or `admin_token` without one.
    pub async fn get_workspace_auth_details(
        &self,
        admin_token: &str,
        workspace_id: &str,
    ) -> Result<(String, String), ClientError> {
        let res = self
            .send(Method::GET, &format!("/api/workspaces/{workspace_id}"), admin_token, None)
            .await?;
        let props = &res["workspace"]["properties"];
        let scope_uri = match props["scope_id"].as_str() {
            Some(scope) if !scope.is_empty() => scope.to_string(),
            _ => {
                let client_id = props["client_id"].as_str().ok_or(ClientError::MissingField("client_id"))?;
                format!("api://{client_id}")
            }
        };
        let token = if self.owner_token.is_empty() { admin_token } else { self.owner_token.as_str() };
        Ok((token.to_string(), scope_uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: StatusCode) -> ClientError {
        ClientError::Status { method: Method::GET, path: "/api".into(), status: code, body: String::new() }
    }

    #[test]
    fn only_gateway_errors_are_retryable() {
        assert!(status(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(status(StatusCode::GATEWAY_TIMEOUT).is_retryable());
        assert!(!status(StatusCode::BAD_REQUEST).is_retryable());
        assert!(!status(StatusCode::CONFLICT).is_retryable());
        assert!(!ClientError::MissingField("id").is_retryable());
    }

    #[test]
    fn base_url_is_trimmed() {
        let cfg = PerfConfig { resource_api_url: " http://localhost:8080/ ".into(), ..PerfConfig::default() };
        let client = ResourceApiClient::new(&cfg).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
