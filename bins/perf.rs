use std::process::ExitCode;
use std::sync::Arc;

use dotenvy::dotenv;
use perf::scenarios::{self, BULK_UPDATES_IN_SERIES, PARALLEL_RESOURCE_CREATIONS};
use perf::{PerfConfig, ResourceApiClient, ScenarioError, ScenarioReport};
use tracing::{error, info};

const USAGE: &str = "usage: perf [parallel_resource_creations|bulk_updates_in_series|all]";

async fn run_scenario(
    name: &str,
    client: Arc<ResourceApiClient>,
    cfg: &PerfConfig,
) -> Result<ScenarioReport, ScenarioError> {
    match name {
        PARALLEL_RESOURCE_CREATIONS => scenarios::parallel_resource_creations(client, cfg).await,
        _ => scenarios::bulk_updates_in_series(client, cfg).await,
    }
}

async fn run(selected: &[&'static str]) -> anyhow::Result<bool> {
    let cfg = PerfConfig::load()?;
    let client = Arc::new(ResourceApiClient::new(&cfg)?);
    info!(service = "perf", event = "start", url = %cfg.resource_api_url, scenarios = ?selected, "perf run starting");

    let mut ok = true;
    for name in selected {
        match run_scenario(name, Arc::clone(&client), &cfg).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(ScenarioError::TasksFailed { report, first }) => {
                println!("{}", serde_json::to_string(&report)?);
                error!(service = "perf", scenario = name, failures = report.failures, error = %first, "scenario failed");
                ok = false;
            }
        }
    }
    print!("{}", perf::observability::encode_metrics());
    Ok(ok)
}

fn main() -> ExitCode {
    dotenv().ok();
    common::utils::logging::init_logging_from_env();

    let arg = std::env::args().nth(1).unwrap_or_else(|| "all".to_string());
    let selected: Vec<&'static str> = match arg.as_str() {
        PARALLEL_RESOURCE_CREATIONS => vec![PARALLEL_RESOURCE_CREATIONS],
        BULK_UPDATES_IN_SERIES => vec![BULK_UPDATES_IN_SERIES],
        "all" => vec![PARALLEL_RESOURCE_CREATIONS, BULK_UPDATES_IN_SERIES],
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "perf", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    match rt.block_on(run(&selected)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(service = "perf", event = "run_failed", error = %e, "perf run failed");
            ExitCode::FAILURE
        }
    }
}
