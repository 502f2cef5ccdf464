//! Service layer of the resource orchestrator.
//! - `serial`: keyed executor that runs jobs for one key strictly in order.
//! - `resources`: resource CRUD and the operation processor built on it.
//! - `state_store`: document database client and startup bootstrap.

pub mod errors;
pub mod serial;
pub mod resources;
pub mod state_store;
