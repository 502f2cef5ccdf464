pub mod client;
pub mod config;
pub mod observability;
pub mod retry;
pub mod scenarios;

pub use client::{ClientError, ResourceApiClient};
pub use config::PerfConfig;
pub use scenarios::{ScenarioError, ScenarioReport};
