use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Workspace,
    WorkspaceService,
    UserResource,
}

impl ResourceType {
    /// Path segment of the collection this type lives in.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::Workspace => "workspaces",
            ResourceType::WorkspaceService => "workspace-services",
            ResourceType::UserResource => "user-resources",
        }
    }

    /// JSON key used when a single resource is returned.
    pub fn response_key(&self) -> &'static str {
        match self {
            ResourceType::Workspace => "workspace",
            ResourceType::WorkspaceService => "workspaceService",
            ResourceType::UserResource => "userResource",
        }
    }

    /// JSON key used when a list is returned.
    pub fn list_key(&self) -> &'static str {
        match self {
            ResourceType::Workspace => "workspaces",
            ResourceType::WorkspaceService => "workspaceServices",
            ResourceType::UserResource => "userResources",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    NotDeployed,
    AwaitingDeployment,
    Deploying,
    Deployed,
    DeploymentFailed,
    AwaitingUpdate,
    Updating,
    UpdateFailed,
    AwaitingDeletion,
    Deleting,
    Deleted,
    DeletionFailed,
}

impl ResourceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Deployed
                | ResourceStatus::DeploymentFailed
                | ResourceStatus::UpdateFailed
                | ResourceStatus::Deleted
                | ResourceStatus::DeletionFailed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResourceStatus::DeploymentFailed | ResourceStatus::UpdateFailed | ResourceStatus::DeletionFailed
        )
    }
}

/// Ancestors of a resource; which ids are required depends on its type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceParent {
    pub workspace_id: Option<Uuid>,
    pub workspace_service_id: Option<Uuid>,
}

impl ResourceParent {
    pub fn none() -> Self { Self::default() }

    pub fn workspace(workspace_id: Uuid) -> Self {
        Self { workspace_id: Some(workspace_id), workspace_service_id: None }
    }

    pub fn workspace_service(workspace_id: Uuid, workspace_service_id: Uuid) -> Self {
        Self { workspace_id: Some(workspace_id), workspace_service_id: Some(workspace_service_id) }
    }
}

/// Build the API path of a resource, e.g.
/// `/workspaces/{wid}/workspace-services/{sid}/user-resources/{id}`.
pub fn resource_path(resource_type: ResourceType, parent: &ResourceParent, id: Uuid) -> Result<String, ModelError> {
    match (resource_type, parent.workspace_id, parent.workspace_service_id) {
        (ResourceType::Workspace, None, None) => Ok(format!("/workspaces/{id}")),
        (ResourceType::WorkspaceService, Some(wid), None) => {
            Ok(format!("/workspaces/{wid}/workspace-services/{id}"))
        }
        (ResourceType::UserResource, Some(wid), Some(sid)) => {
            Ok(format!("/workspaces/{wid}/workspace-services/{sid}/user-resources/{id}"))
        }
        _ => Err(ModelError::validation(format!(
            "parent ids do not match resource type {:?}",
            resource_type
        ))),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub template_name: String,
    pub template_version: String,
    pub properties: Map<String, Value>,
    pub is_enabled: bool,
    pub deployment_status: ResourceStatus,
    pub resource_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workspace_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workspace_service_id: Option<Uuid>,
    pub resource_version: u64,
    pub updated_when: DateTime<Utc>,
}

impl Resource {
    /// Create a not-yet-deployed resource from a validated input.
    pub fn new(
        resource_type: ResourceType,
        template: &Template,
        input: ResourceInput,
        parent: ResourceParent,
    ) -> Result<Self, ModelError> {
        template.validate(resource_type, &input.properties)?;
        let id = Uuid::new_v4();
        Ok(Self {
            id,
            resource_type,
            template_name: template.name.to_string(),
            template_version: template.version.to_string(),
            properties: input.properties,
            is_enabled: true,
            deployment_status: ResourceStatus::NotDeployed,
            resource_path: resource_path(resource_type, &parent, id)?,
            parent_workspace_id: parent.workspace_id,
            parent_workspace_service_id: parent.workspace_service_id,
            resource_version: 0,
            updated_when: Utc::now(),
        })
    }

    pub fn parent(&self) -> ResourceParent {
        ResourceParent {
            workspace_id: self.parent_workspace_id,
            workspace_service_id: self.parent_workspace_service_id,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.properties.get("display_name").and_then(Value::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.deployment_status == ResourceStatus::Deleted
    }

    /// Merge a patch into the resource and bump its version.
    pub fn apply_patch(&mut self, patch: &ResourcePatch) {
        if let Some(enabled) = patch.is_enabled {
            self.is_enabled = enabled;
        }
        if let Some(props) = &patch.properties {
            for (k, v) in props {
                self.properties.insert(k.clone(), v.clone());
            }
        }
        self.resource_version += 1;
        self.updated_when = Utc::now();
    }
}

/// Body of a create request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInput {
    pub template_name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Body of a patch request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl ResourcePatch {
    pub fn disable() -> Self {
        Self { is_enabled: Some(false), properties: None }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.is_enabled.is_none() && self.properties.as_ref().map_or(true, Map::is_empty) {
            return Err(ModelError::validation("patch must set isEnabled or properties"));
        }
        Ok(())
    }
}
