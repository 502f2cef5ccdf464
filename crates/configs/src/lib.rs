use std::io;

use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;
use common::env::{list, parse_var, var_non_empty};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

/// Document database holding the orchestrator state.
///
/// An endpoint of `memory://` selects the in-process store.
#[derive(Debug, Clone, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: String::new(),
            database: default_database(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Simulated provider work per operation.
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { max_workers: default_max_workers(), step_delay_ms: default_step_delay() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Accepted bearer tokens. Empty accepts any non-empty token.
    #[serde(default)]
    pub tokens: Vec<String>,
}

fn default_database() -> String { "AzureTRE".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_max_workers() -> usize { 8 }
fn default_step_delay() -> u64 { 50 }

fn config_path() -> String {
    var_non_empty("CONFIG_PATH").unwrap_or_else(|| "config.toml".to_string())
}

/// Load `path`, or defaults when the file does not exist. A file that exists
/// but cannot be read or parsed is an error.
pub fn load_or_default(path: &str) -> Result<AppConfig> {
    match std::fs::read_to_string(path) {
        Ok(content) => load_from_str(&content).map_err(|e| anyhow!("invalid config {path}: {e}")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(anyhow!("reading config {path}: {e}")),
    }
}

pub fn load_from_str(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load `CONFIG_PATH` (default `config.toml`), apply environment
    /// overrides and validate. A missing file yields defaults.
    pub fn load_or_env() -> Result<Self> {
        let mut cfg = load_or_default(&config_path())?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize_from_env();
        self.server.normalize()?;
        self.state_store.normalize_from_env();
        self.state_store.validate()?;
        self.processor.validate()?;
        self.auth.normalize_from_env();
        Ok(())
    }
}


impl ServerConfig {
    fn normalize_from_env(&mut self) {
        if let Some(host) = var_non_empty("SERVER_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_var::<u16>("SERVER_PORT") {
            self.port = port;
        }
        if let Some(w) = parse_var::<usize>("TOKIO_WORKER_THREADS") {
            self.worker_threads = Some(w);
        }
    }

    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        Ok(())
    }
}

impl StateStoreConfig {
    pub fn normalize_from_env(&mut self) {
        if self.endpoint.trim().is_empty() {
            if let Some(v) = var_non_empty("STATE_STORE_ENDPOINT") { self.endpoint = v; }
        }
        if self.key.trim().is_empty() {
            if let Some(v) = var_non_empty("STATE_STORE_KEY") { self.key = v; }
        }
        if let Some(v) = var_non_empty("STATE_STORE_DATABASE") {
            self.database = v;
        }
    }

    /// An empty endpoint is allowed: the server then runs without a state store.
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(anyhow!("state_store.database must not be empty"));
        }
        let endpoint = self.endpoint.trim().to_lowercase();
        if !endpoint.is_empty()
            && !(endpoint.starts_with("https://")
                || endpoint.starts_with("http://")
                || endpoint.starts_with("memory://"))
        {
            return Err(anyhow!("state_store.endpoint must start with http(s):// or memory://"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("state_store.request_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow!("processor.max_workers must be >= 1"));
        }
        Ok(())
    }
}

impl AuthConfig {
    fn normalize_from_env(&mut self) {
        if self.tokens.is_empty() {
            self.tokens = list("API_TOKENS");
        }
    }
}
