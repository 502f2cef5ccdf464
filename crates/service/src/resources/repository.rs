use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use models::{Operation, Resource, ResourceParent, ResourceType};
use uuid::Uuid;

/// In-memory store of resources and their operations.
#[derive(Default)]
pub struct ResourceRepository {
    resources: DashMap<Uuid, Resource>,
    operations: DashMap<Uuid, StoredOperation>,
    next_seq: AtomicU64,
}

struct StoredOperation {
    seq: u64,
    op: Operation,
}

impl ResourceRepository {
    pub fn new() -> Self { Self::default() }

    pub fn insert_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn get_resource(&self, id: Uuid) -> Option<Resource> {
        self.resources.get(&id).map(|r| r.clone())
    }

    /// Mutate a resource in place and return the updated copy.
    pub fn update_resource<F>(&self, id: Uuid, f: F) -> Option<Resource>
    where
        F: FnOnce(&mut Resource),
    {
        let mut entry = self.resources.get_mut(&id)?;
        f(entry.value_mut());
        Some(entry.clone())
    }

    /// Non-deleted resources of a type under the given parent.
    pub fn list_resources(&self, resource_type: ResourceType, parent: &ResourceParent) -> Vec<Resource> {
        let mut items: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| r.resource_type == resource_type && &r.parent() == parent && !r.is_deleted())
            .map(|r| r.clone())
            .collect();
        items.sort_by_key(|r| r.updated_when);
        items
    }

    /// Direct children of a resource that are not deleted.
    pub fn live_children(&self, parent: &Resource) -> Vec<Resource> {
        self.resources
            .iter()
            .filter(|r| !r.is_deleted())
            .filter(|r| match parent.resource_type {
                ResourceType::Workspace => {
                    r.resource_type == ResourceType::WorkspaceService && r.parent_workspace_id == Some(parent.id)
                }
                ResourceType::WorkspaceService => {
                    r.resource_type == ResourceType::UserResource && r.parent_workspace_service_id == Some(parent.id)
                }
                ResourceType::UserResource => false,
            })
            .map(|r| r.clone())
            .collect()
    }

    pub fn insert_operation(&self, op: Operation) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.operations.insert(op.id, StoredOperation { seq, op });
    }

    pub fn get_operation(&self, id: Uuid) -> Option<Operation> {
        self.operations.get(&id).map(|o| o.op.clone())
    }

    pub fn update_operation<F>(&self, id: Uuid, f: F) -> Option<Operation>
    where
        F: FnOnce(&mut Operation),
    {
        let mut entry = self.operations.get_mut(&id)?;
        f(&mut entry.op);
        Some(entry.op.clone())
    }

    /// Operations of a resource in the order they were accepted.
    pub fn operations_for(&self, resource_id: Uuid) -> Vec<Operation> {
        let mut ops: Vec<(u64, Operation)> = self
            .operations
            .iter()
            .filter(|o| o.op.resource_id == resource_id)
            .map(|o| (o.seq, o.op.clone()))
            .collect();
        ops.sort_by_key(|(seq, _)| *seq);
        ops.into_iter().map(|(_, op)| op).collect()
    }
}
