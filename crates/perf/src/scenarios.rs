//! Load scenarios against a running resource API.
//!
//! Both scenarios fan out with a [`JoinSet`] and join every task before
//! moving to the next phase. A failed task is counted and the scenario keeps
//! going so that whatever was created still gets cleaned up.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::client::{ClientError, ResourceApiClient};
use crate::config::PerfConfig;
use crate::observability;

pub const PARALLEL_RESOURCE_CREATIONS: &str = "parallel_resource_creations";
pub const BULK_UPDATES_IN_SERIES: &str = "bulk_updates_in_series";

const API_WORKSPACES: &str = "/api/workspaces";

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub resources: usize,
    pub requests: u64,
    pub failures: usize,
    pub elapsed_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("{} tasks in {} failed, first error: {first}", .report.failures, .report.name)]
    TasksFailed { report: ScenarioReport, first: String },
}

/// Nearest-rank percentile over unsorted samples: the smallest sample with at
/// least `pct` percent of samples at or below it.
pub fn percentile(samples: &[Duration], pct: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted = samples.to_vec();
    sorted.sort();
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

type Timed<T> = Result<(T, Duration), ClientError>;

async fn timed<T>(scenario: &'static str, fut: impl Future<Output = Result<T, ClientError>>) -> Timed<T> {
    let started = Instant::now();
    let out = fut.await?;
    let elapsed = started.elapsed();
    observability::OPERATION_SECONDS
        .with_label_values(&[scenario])
        .observe(elapsed.as_secs_f64());
    Ok((out, elapsed))
}

struct Tally {
    scenario: &'static str,
    started: Instant,
    requests_before: u64,
    latencies: Vec<Duration>,
    resources: usize,
    failures: usize,
    first_error: Option<String>,
}

impl Tally {
    fn new(scenario: &'static str, client: &ResourceApiClient) -> Self {
        info!(scenario, "scenario starting");
        Self {
            scenario,
            started: Instant::now(),
            requests_before: client.requests_sent(),
            latencies: Vec::new(),
            resources: 0,
            failures: 0,
            first_error: None,
        }
    }

    fn fail(&mut self, error: impl Display) {
        warn!(scenario = self.scenario, error = %error, "scenario task failed");
        observability::SCENARIO_FAILURES_TOTAL.with_label_values(&[self.scenario]).inc();
        self.failures += 1;
        self.first_error.get_or_insert_with(|| error.to_string());
    }

    fn record<T>(&mut self, res: Timed<T>) -> Option<T> {
        match res {
            Ok((value, elapsed)) => {
                self.latencies.push(elapsed);
                Some(value)
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// Join every task in the set, keeping the successful outputs.
    async fn join<T: 'static>(&mut self, mut set: JoinSet<Timed<T>>) -> Vec<T> {
        let mut out = Vec::with_capacity(set.len());
        while let Some(res) = set.join_next().await {
            match res {
                Ok(res) => out.extend(self.record(res)),
                Err(e) => self.fail(format!("task aborted: {e}")),
            }
        }
        out
    }

    fn finish(self, client: &ResourceApiClient) -> Result<ScenarioReport, ScenarioError> {
        let report = ScenarioReport {
            name: self.scenario,
            resources: self.resources,
            requests: client.requests_sent().saturating_sub(self.requests_before),
            failures: self.failures,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            p50_ms: percentile(&self.latencies, 50.0).as_millis() as u64,
            p95_ms: percentile(&self.latencies, 95.0).as_millis() as u64,
        };
        info!(
            scenario = report.name,
            resources = report.resources,
            requests = report.requests,
            failures = report.failures,
            elapsed_ms = report.elapsed_ms,
            p50_ms = report.p50_ms,
            p95_ms = report.p95_ms,
            "scenario finished"
        );
        match self.first_error {
            Some(first) => Err(ScenarioError::TasksFailed { report, first }),
            None => Ok(report),
        }
    }
}

/// Create N workspaces in parallel, then disable and delete them all in
/// parallel.
pub async fn parallel_resource_creations(
    client: Arc<ResourceApiClient>,
    cfg: &PerfConfig,
) -> Result<ScenarioReport, ScenarioError> {
    let scenario = PARALLEL_RESOURCE_CREATIONS;
    let mut tally = Tally::new(scenario, &client);

    let mut set = JoinSet::new();
    for i in 0..cfg.number_workspaces {
        let client = Arc::clone(&client);
        let token = cfg.admin_token.clone();
        let payload = json!({
            "templateName": "tre-workspace-base",
            "properties": {
                "display_name": format!("Perf Test Workspace {i}"),
                "description": "workspace for perf test",
                "address_space_size": "small",
                "client_id": cfg.test_workspace_app_id,
            }
        });
        set.spawn(async move {
            timed(scenario, client.post_resource(&payload, API_WORKSPACES, &token, Method::POST, true)).await
        });
    }
    let workspaces = tally.join(set).await;
    tally.resources = workspaces.len();

    let mut set = JoinSet::new();
    for (workspace_path, _) in workspaces {
        let client = Arc::clone(&client);
        let token = cfg.admin_token.clone();
        set.spawn(async move {
            let path = format!("/api{workspace_path}");
            timed(scenario, client.disable_and_delete_resource(&path, &token)).await
        });
    }
    tally.join(set).await;
    tally.finish(&client)
}

/// Create VMs in parallel inside one workspace service, stack several
/// un-awaited patches on each, then disable and delete every VM.
///
/// The disable and delete only succeed if each VM's operations ran one after
/// another. The workspace and service are created (and removed afterwards)
/// unless existing ids are configured.
pub async fn bulk_updates_in_series(
    client: Arc<ResourceApiClient>,
    cfg: &PerfConfig,
) -> Result<ScenarioReport, ScenarioError> {
    let scenario = BULK_UPDATES_IN_SERIES;
    let mut tally = Tally::new(scenario, &client);
    let admin_token = cfg.admin_token.as_str();

    let create_workspace = cfg.perf_test_workspace_id.is_empty();
    let workspace = if create_workspace {
        let payload = json!({
            "templateName": "tre-workspace-base",
            "properties": {
                "display_name": "Perf test workspace",
                "description": "",
                "address_space_size": "small",
                "client_id": cfg.test_workspace_app_id,
                "client_secret": cfg.test_workspace_app_secret,
            }
        });
        tally.record(timed(scenario, client.post_resource(&payload, API_WORKSPACES, admin_token, Method::POST, true)).await)
    } else {
        Some((format!("/workspaces/{}", cfg.perf_test_workspace_id), cfg.perf_test_workspace_id.clone()))
    };
    let Some((workspace_path, workspace_id)) = workspace else {
        return tally.finish(&client);
    };

    match client.get_workspace_auth_details(admin_token, &workspace_id).await {
        Ok((owner_token, scope_uri)) => {
            update_vms_in_workspace(&client, cfg, &mut tally, &workspace_path, &owner_token, &scope_uri).await
        }
        Err(e) => tally.fail(e),
    }

    if create_workspace {
        let path = format!("/api{workspace_path}");
        let res = timed(scenario, client.disable_and_delete_resource(&path, admin_token)).await;
        tally.record(res);
    }
    tally.finish(&client)
}

/// VM phase of [`bulk_updates_in_series`]. Creates the workspace service
/// first unless one is configured, and removes it again afterwards.
async fn update_vms_in_workspace(
    client: &Arc<ResourceApiClient>,
    cfg: &PerfConfig,
    tally: &mut Tally,
    workspace_path: &str,
    owner_token: &str,
    scope_uri: &str,
) {
    let scenario = tally.scenario;
    let create_service = cfg.perf_test_workspace_service_id.is_empty();
    let service_path = if create_service {
        let payload = json!({
            "templateName": "tre-service-guacamole",
            "properties": {
                "display_name": "Workspace service test",
                "description": "",
                "workspace_identifier_uri": scope_uri,
            }
        });
        let endpoint = format!("/api{workspace_path}/workspace-services");
        let res = timed(scenario, client.post_resource(&payload, &endpoint, owner_token, Method::POST, true)).await;
        match tally.record(res) {
            Some((path, _)) => path,
            None => return,
        }
    } else {
        format!("{workspace_path}/workspace-services/{}", cfg.perf_test_workspace_service_id)
    };

    let mut set = JoinSet::new();
    for _ in 0..cfg.number_vms {
        let client = Arc::clone(client);
        let token = owner_token.to_string();
        let endpoint = format!("/api{service_path}/user-resources");
        set.spawn(async move {
            let payload = json!({
                "templateName": "tre-service-dev-vm",
                "properties": {
                    "display_name": "Perf test VM",
                    "description": "",
                    "os_image": "Ubuntu 18.04",
                }
            });
            timed(scenario, client.post_resource(&payload, &endpoint, &token, Method::POST, true)).await
        });
    }
    let vms = tally.join(set).await;
    tally.resources = vms.len();

    let mut set = JoinSet::new();
    for (vm_path, _) in vms {
        let path = format!("/api{vm_path}");
        for i in 0..cfg.number_updates {
            let patch = json!({ "properties": { "display_name": format!("Perf test VM update {i}") } });
            if let Err(e) = client.post_resource(&patch, &path, owner_token, Method::PATCH, false).await {
                tally.fail(e);
            }
        }
        let client = Arc::clone(client);
        let token = owner_token.to_string();
        set.spawn(async move { timed(scenario, client.disable_and_delete_resource(&path, &token)).await });
    }
    tally.join(set).await;

    if create_service {
        let path = format!("/api{service_path}");
        let res = timed(scenario, client.disable_and_delete_resource(&path, owner_token)).await;
        tally.record(res);
    }
}
