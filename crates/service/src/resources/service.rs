use std::sync::Arc;

use models::{
    template, Operation, OperationAction, Resource, ResourceInput, ResourceParent, ResourcePatch, ResourceType,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::processor::ResourceProcessor;
use super::repository::ResourceRepository;
use crate::errors::ServiceError;

/// Accepts resource requests and turns them into queued operations.
#[derive(Clone)]
pub struct ResourceService {
    repo: Arc<ResourceRepository>,
    processor: ResourceProcessor,
}

impl ResourceService {
    pub fn new(repo: Arc<ResourceRepository>, processor: ResourceProcessor) -> Self {
        Self { repo, processor }
    }

    pub fn processor(&self) -> &ResourceProcessor {
        &self.processor
    }

    /// Validate and store a new resource, then queue its install operation.
    #[instrument(skip(self, input), fields(template = %input.template_name))]
    pub fn create(
        &self,
        resource_type: ResourceType,
        parent: ResourceParent,
        input: ResourceInput,
    ) -> Result<(Resource, Operation), ServiceError> {
        let tpl = template::find(&input.template_name)
            .ok_or_else(|| ServiceError::Validation(format!("unknown template {}", input.template_name)))?;
        self.check_parents(resource_type, &parent)?;

        let resource = Resource::new(resource_type, tpl, input, parent)?;
        self.repo.insert_resource(resource.clone());
        let op = self.enqueue(&resource, OperationAction::Install, None)?;
        info!(resource_id = %resource.id, path = %resource.resource_path, "resource_created");
        Ok((resource, op))
    }

    /// Queue an upgrade carrying `patch`. Does not wait for earlier operations.
    pub fn patch(
        &self,
        resource_type: ResourceType,
        parent: ResourceParent,
        id: Uuid,
        patch: ResourcePatch,
    ) -> Result<Operation, ServiceError> {
        patch.validate()?;
        let resource = self.get(resource_type, parent, id)?;
        if resource.is_deleted() {
            return Err(ServiceError::Conflict(format!("{} has been deleted", resource.resource_path)));
        }
        self.enqueue(&resource, OperationAction::Upgrade, Some(patch))
    }

    /// Queue the uninstall of a disabled resource without live children.
    pub fn delete(&self, resource_type: ResourceType, parent: ResourceParent, id: Uuid) -> Result<Operation, ServiceError> {
        let resource = self.get(resource_type, parent, id)?;
        if resource.is_deleted() {
            return Err(ServiceError::Conflict(format!("{} has already been deleted", resource.resource_path)));
        }
        if resource.is_enabled {
            return Err(ServiceError::Validation("resource must be disabled before it can be deleted".into()));
        }
        let children = self.repo.live_children(&resource);
        if !children.is_empty() {
            return Err(ServiceError::Conflict(format!(
                "{} has {} child resources that must be deleted first",
                resource.resource_path,
                children.len()
            )));
        }
        self.enqueue(&resource, OperationAction::Uninstall, None)
    }

    /// Fetch a resource, checking it lives under the given parent.
    pub fn get(&self, resource_type: ResourceType, parent: ResourceParent, id: Uuid) -> Result<Resource, ServiceError> {
        self.repo
            .get_resource(id)
            .filter(|r| r.resource_type == resource_type && r.parent() == parent)
            .ok_or_else(|| ServiceError::not_found(resource_type.response_key()))
    }

    pub fn list(&self, resource_type: ResourceType, parent: ResourceParent) -> Result<Vec<Resource>, ServiceError> {
        self.check_parents(resource_type, &parent)?;
        Ok(self.repo.list_resources(resource_type, &parent))
    }

    pub fn get_operation(
        &self,
        resource_type: ResourceType,
        parent: ResourceParent,
        id: Uuid,
        operation_id: Uuid,
    ) -> Result<Operation, ServiceError> {
        let resource = self.get(resource_type, parent, id)?;
        self.repo
            .get_operation(operation_id)
            .filter(|o| o.resource_id == resource.id)
            .ok_or_else(|| ServiceError::not_found("operation"))
    }

    pub fn list_operations(
        &self,
        resource_type: ResourceType,
        parent: ResourceParent,
        id: Uuid,
    ) -> Result<Vec<Operation>, ServiceError> {
        let resource = self.get(resource_type, parent, id)?;
        Ok(self.repo.operations_for(resource.id))
    }

    fn enqueue(
        &self,
        resource: &Resource,
        action: OperationAction,
        patch: Option<ResourcePatch>,
    ) -> Result<Operation, ServiceError> {
        let op = Operation::new(resource, action, patch);
        self.repo.insert_operation(op.clone());
        // callers poll the operation; the handle is not needed here
        let _ = self.processor.submit(&op)?;
        Ok(op)
    }

    /// Parents must exist, be enabled and not be deleted.
    fn check_parents(&self, resource_type: ResourceType, parent: &ResourceParent) -> Result<(), ServiceError> {
        let workspace_parent = ResourceParent::none();
        match (resource_type, parent.workspace_id, parent.workspace_service_id) {
            (ResourceType::Workspace, None, None) => Ok(()),
            (ResourceType::WorkspaceService, Some(wid), None) => {
                self.check_live_parent(ResourceType::Workspace, workspace_parent, wid)
            }
            (ResourceType::UserResource, Some(wid), Some(sid)) => {
                self.check_live_parent(ResourceType::Workspace, workspace_parent, wid)?;
                self.check_live_parent(ResourceType::WorkspaceService, ResourceParent::workspace(wid), sid)
            }
            _ => Err(ServiceError::Validation(format!("invalid parent for {:?}", resource_type))),
        }
    }

    fn check_live_parent(&self, resource_type: ResourceType, parent: ResourceParent, id: Uuid) -> Result<(), ServiceError> {
        let resource = self.get(resource_type, parent, id)?;
        if resource.is_deleted() {
            return Err(ServiceError::not_found(resource_type.response_key()));
        }
        if !resource.is_enabled {
            return Err(ServiceError::Validation(format!("{} is disabled", resource.resource_path)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configs::ProcessorConfig;
    use models::ResourceStatus;
    use serde_json::{json, Value};
    use tokio::time::{sleep, Duration};

    fn service() -> ResourceService {
        let repo = Arc::new(ResourceRepository::new());
        let processor =
            ResourceProcessor::new(Arc::clone(&repo), &ProcessorConfig { max_workers: 4, step_delay_ms: 1 });
        ResourceService::new(repo, processor)
    }

    fn input(template: &str, props: Value) -> ResourceInput {
        ResourceInput { template_name: template.into(), properties: props.as_object().cloned().unwrap_or_default() }
    }

    fn workspace() -> ResourceInput {
        input(
            "tre-workspace-base",
            json!({"display_name": "ws", "description": "", "address_space_size": "small", "client_id": "app"}),
        )
    }

    async fn settle(svc: &ResourceService, rt: ResourceType, parent: ResourceParent, id: Uuid) -> Resource {
        for _ in 0..200 {
            if svc.processor().pending(id) == 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        svc.get(rt, parent, id).unwrap()
    }

    #[tokio::test]
    async fn create_installs_resource() {
        let svc = service();
        let (ws, op) = svc.create(ResourceType::Workspace, ResourceParent::none(), workspace()).unwrap();
        assert_eq!(op.action, OperationAction::Install);
        let ws = settle(&svc, ResourceType::Workspace, ResourceParent::none(), ws.id).await;
        assert_eq!(ws.deployment_status, ResourceStatus::Deployed);
        let ops = svc.list_operations(ResourceType::Workspace, ResourceParent::none(), ws.id).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].succeeded());
    }

    #[tokio::test]
    async fn rejects_unknown_template_and_missing_parent() {
        let svc = service();
        let err = svc
            .create(ResourceType::Workspace, ResourceParent::none(), input("nope", json!({})))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let svc_input = input("tre-service-guacamole", json!({"display_name": "g", "description": ""}));
        let err = svc
            .create(ResourceType::WorkspaceService, ResourceParent::workspace(Uuid::new_v4()), svc_input)
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_requires_disable_and_no_children() {
        let svc = service();
        let root = ResourceParent::none();
        let (ws, _) = svc.create(ResourceType::Workspace, root, workspace()).unwrap();
        let ws_parent = ResourceParent::workspace(ws.id);
        let (guac, _) = svc
            .create(
                ResourceType::WorkspaceService,
                ws_parent,
                input("tre-service-guacamole", json!({"display_name": "g", "description": ""})),
            )
            .unwrap();

        assert!(matches!(svc.delete(ResourceType::Workspace, root, ws.id), Err(ServiceError::Validation(_))));

        svc.patch(ResourceType::Workspace, root, ws.id, ResourcePatch::disable()).unwrap();
        settle(&svc, ResourceType::Workspace, root, ws.id).await;
        assert!(matches!(svc.delete(ResourceType::Workspace, root, ws.id), Err(ServiceError::Conflict(_))));

        svc.patch(ResourceType::WorkspaceService, ws_parent, guac.id, ResourcePatch::disable()).unwrap();
        settle(&svc, ResourceType::WorkspaceService, ws_parent, guac.id).await;
        svc.delete(ResourceType::WorkspaceService, ws_parent, guac.id).unwrap();
        let guac = settle(&svc, ResourceType::WorkspaceService, ws_parent, guac.id).await;
        assert!(guac.is_deleted());

        svc.delete(ResourceType::Workspace, root, ws.id).unwrap();
        let ws = settle(&svc, ResourceType::Workspace, root, ws.id).await;
        assert!(ws.is_deleted());
        assert!(svc.list(ResourceType::Workspace, root).unwrap().is_empty());
        assert!(matches!(
            svc.patch(ResourceType::Workspace, root, ws.id, ResourcePatch::disable()),
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn patch_queued_behind_delete_does_not_restore_resource() {
        let svc = service();
        let root = ResourceParent::none();
        let (ws, _) = svc.create(ResourceType::Workspace, root, workspace()).unwrap();
        svc.patch(ResourceType::Workspace, root, ws.id, ResourcePatch::disable()).unwrap();
        settle(&svc, ResourceType::Workspace, root, ws.id).await;

        svc.delete(ResourceType::Workspace, root, ws.id).unwrap();
        let enable = ResourcePatch { is_enabled: Some(true), properties: None };
        let patch_op = svc.patch(ResourceType::Workspace, root, ws.id, enable).unwrap();
        let delete_again = svc.delete(ResourceType::Workspace, root, ws.id).unwrap();

        let ws = settle(&svc, ResourceType::Workspace, root, ws.id).await;
        assert!(ws.is_deleted());
        assert!(!ws.is_enabled);
        assert!(svc.list(ResourceType::Workspace, root).unwrap().is_empty());
        let op = |id| svc.get_operation(ResourceType::Workspace, root, ws.id, id).unwrap().status;
        assert_eq!(op(patch_op.id), ResourceStatus::UpdateFailed);
        assert_eq!(op(delete_again.id), ResourceStatus::DeletionFailed);
    }

    #[tokio::test]
    async fn lookups_are_scoped_to_parent() {
        let svc = service();
        let (ws, op) = svc.create(ResourceType::Workspace, ResourceParent::none(), workspace()).unwrap();
        let other = ResourceParent::workspace(Uuid::new_v4());
        assert!(svc.get(ResourceType::WorkspaceService, other, ws.id).is_err());
        assert!(svc.get_operation(ResourceType::Workspace, ResourceParent::none(), ws.id, op.id).is_ok());
        assert!(svc
            .get_operation(ResourceType::Workspace, ResourceParent::none(), ws.id, Uuid::new_v4())
            .is_err());
    }
}
