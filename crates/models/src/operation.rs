use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::{Resource, ResourcePatch, ResourceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Install,
    Upgrade,
    Uninstall,
}

impl OperationAction {
    pub fn pending_status(&self) -> ResourceStatus {
        match self {
            OperationAction::Install => ResourceStatus::AwaitingDeployment,
            OperationAction::Upgrade => ResourceStatus::AwaitingUpdate,
            OperationAction::Uninstall => ResourceStatus::AwaitingDeletion,
        }
    }

    pub fn in_progress_status(&self) -> ResourceStatus {
        match self {
            OperationAction::Install => ResourceStatus::Deploying,
            OperationAction::Upgrade => ResourceStatus::Updating,
            OperationAction::Uninstall => ResourceStatus::Deleting,
        }
    }

    pub fn success_status(&self) -> ResourceStatus {
        match self {
            OperationAction::Install | OperationAction::Upgrade => ResourceStatus::Deployed,
            OperationAction::Uninstall => ResourceStatus::Deleted,
        }
    }

    pub fn failure_status(&self) -> ResourceStatus {
        match self {
            OperationAction::Install => ResourceStatus::DeploymentFailed,
            OperationAction::Upgrade => ResourceStatus::UpdateFailed,
            OperationAction::Uninstall => ResourceStatus::DeletionFailed,
        }
    }
}

/// One asynchronous request against a resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub resource_path: String,
    /// Resource version at the time the operation was accepted.
    pub resource_version: u64,
    pub action: OperationAction,
    pub status: ResourceStatus,
    pub message: String,
    /// Patch carried by upgrade operations; applied when the operation runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<ResourcePatch>,
    pub created_when: DateTime<Utc>,
    pub updated_when: DateTime<Utc>,
}

impl Operation {
    pub fn new(resource: &Resource, action: OperationAction, patch: Option<ResourcePatch>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            resource_path: resource.resource_path.clone(),
            resource_version: resource.resource_version,
            action,
            status: action.pending_status(),
            message: format!("{:?} request accepted", action).to_lowercase(),
            patch,
            created_when: now,
            updated_when: now,
        }
    }

    /// API path of this operation relative to `/api`.
    pub fn operation_path(&self) -> String {
        format!("{}/operations/{}", self.resource_path, self.id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_terminal() && !self.status.is_failure()
    }

    pub fn transition(&mut self, status: ResourceStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.updated_when = Utc::now();
    }
}
