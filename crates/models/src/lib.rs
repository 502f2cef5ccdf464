//! Domain types of the resource orchestrator: resources, operations and the
//! template registry they are validated against.

pub mod errors;
pub mod resource;
pub mod operation;
pub mod template;

pub use operation::{Operation, OperationAction};
pub use resource::{Resource, ResourceInput, ResourceParent, ResourcePatch, ResourceStatus, ResourceType};

#[cfg(test)]
mod tests;
