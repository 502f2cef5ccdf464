use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use common::env::{flag, parse_var, var_non_empty};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    pub resource_api_url: String,
    pub admin_token: String,
    /// Token used for workspace-scoped calls; falls back to `admin_token`.
    pub workspace_owner_token: String,
    pub test_workspace_app_id: String,
    pub test_workspace_app_secret: String,
    /// Existing workspace for the bulk update scenario. Empty creates one.
    pub perf_test_workspace_id: String,
    /// Existing workspace service for the bulk update scenario. Empty creates one.
    pub perf_test_workspace_service_id: String,
    pub verify_tls: bool,
    pub poll_interval_ms: u64,
    pub operation_timeout_secs: u64,
    pub number_workspaces: usize,
    pub number_vms: usize,
    pub number_updates: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            resource_api_url: "http://127.0.0.1:8080".to_string(),
            admin_token: String::new(),
            workspace_owner_token: String::new(),
            test_workspace_app_id: String::new(),
            test_workspace_app_secret: String::new(),
            perf_test_workspace_id: String::new(),
            perf_test_workspace_service_id: String::new(),
            verify_tls: true,
            poll_interval_ms: 1000,
            operation_timeout_secs: 3000,
            number_workspaces: 2,
            number_vms: 5,
            number_updates: 5,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { enabled: true, max_attempts: 3, backoff_base_ms: 100, backoff_max_ms: 5000 }
    }
}

impl PerfConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: PerfConfig =
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Read `PERF_CONFIG` (default `perf.json`) when present, then apply
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = var_non_empty("PERF_CONFIG").unwrap_or_else(|| "perf.json".to_string());
        let mut cfg = if Path::new(&path).exists() { Self::load_from_file(&path)? } else { Self::default() };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        let strings = [
            ("RESOURCE_API_URL", &mut self.resource_api_url),
            ("ADMIN_TOKEN", &mut self.admin_token),
            ("WORKSPACE_OWNER_TOKEN", &mut self.workspace_owner_token),
            ("TEST_WORKSPACE_APP_ID", &mut self.test_workspace_app_id),
            ("TEST_WORKSPACE_APP_SECRET", &mut self.test_workspace_app_secret),
            ("PERF_TEST_WORKSPACE_ID", &mut self.perf_test_workspace_id),
            ("PERF_TEST_WORKSPACE_SERVICE_ID", &mut self.perf_test_workspace_service_id),
        ];
        for (name, field) in strings {
            if let Some(v) = var_non_empty(name) {
                *field = v;
            }
        }
        if let Some(v) = flag("VERIFY_TLS") {
            self.verify_tls = v;
        }
        if let Some(v) = parse_var("PERF_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.resource_api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("resource_api_url must start with http:// or https://");
        }
        if self.admin_token.trim().is_empty() {
            anyhow::bail!("admin_token is required (set ADMIN_TOKEN)");
        }
        Ok(())
    }

    /// Owner token when configured, admin token otherwise.
    pub fn owner_token(&self) -> &str {
        if self.workspace_owner_token.trim().is_empty() {
            &self.admin_token
        } else {
            &self.workspace_owner_token
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PerfConfig = serde_json::from_str(r#"{"admin_token": "t", "number_vms": 2}"#).unwrap();
        assert_eq!(cfg.number_vms, 2);
        assert_eq!(cfg.number_updates, 5);
        assert_eq!(cfg.operation_timeout_secs, 3000);
        assert!(cfg.verify_tls);
        assert!(cfg.retry.enabled);
    }

    #[test]
    fn owner_token_falls_back_to_admin() {
        let mut cfg = PerfConfig { admin_token: "admin".into(), ..PerfConfig::default() };
        assert_eq!(cfg.owner_token(), "admin");
        cfg.workspace_owner_token = "owner".into();
        assert_eq!(cfg.owner_token(), "owner");
    }

    #[test]
    fn validate_requires_url_and_token() {
        let mut cfg = PerfConfig::default();
        assert!(cfg.validate().is_err());
        cfg.admin_token = "t".into();
        assert!(cfg.validate().is_ok());
        cfg.resource_api_url = "ftp://x".into();
        assert!(cfg.validate().is_err());
    }
}
