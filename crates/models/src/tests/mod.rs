use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::resource::resource_path;
use crate::{template, Operation, OperationAction, Resource, ResourceInput, ResourceParent, ResourcePatch, ResourceStatus, ResourceType};

fn props(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

fn workspace_input() -> ResourceInput {
    ResourceInput {
        template_name: "tre-workspace-base".into(),
        properties: props(json!({
            "display_name": "Perf Test Workspace 0",
            "description": "workspace for perf test",
            "address_space_size": "small",
            "client_id": "app-id"
        })),
    }
}

#[test]
fn input_deserializes_from_camel_case() {
    let input: ResourceInput = serde_json::from_value(json!({
        "templateName": "tre-service-dev-vm",
        "properties": {"display_name": "vm", "description": "", "os_image": "Ubuntu 18.04"}
    }))
    .unwrap();
    assert_eq!(input.template_name, "tre-service-dev-vm");
    assert_eq!(input.properties["os_image"], "Ubuntu 18.04");
}

#[test]
fn workspace_resource_from_template() {
    let tpl = template::find("tre-workspace-base").unwrap();
    let ws = Resource::new(ResourceType::Workspace, tpl, workspace_input(), ResourceParent::none()).unwrap();
    assert_eq!(ws.resource_path, format!("/workspaces/{}", ws.id));
    assert_eq!(ws.deployment_status, ResourceStatus::NotDeployed);
    assert!(ws.is_enabled);
    assert_eq!(ws.display_name(), Some("Perf Test Workspace 0"));

    let v = serde_json::to_value(&ws).unwrap();
    assert_eq!(v["templateName"], "tre-workspace-base");
    assert_eq!(v["deploymentStatus"], "not_deployed");
    assert!(v.get("parentWorkspaceId").is_none());
}

#[test]
fn template_validation_errors() {
    let tpl = template::find("tre-workspace-base").unwrap();

    let mut missing = workspace_input();
    missing.properties.remove("client_id");
    let err = Resource::new(ResourceType::Workspace, tpl, missing, ResourceParent::none()).unwrap_err();
    assert_eq!(err, ModelError::Validation("missing properties: client_id".into()));

    let mut bad_size = workspace_input();
    bad_size.properties.insert("address_space_size".into(), json!("huge"));
    assert!(Resource::new(ResourceType::Workspace, tpl, bad_size, ResourceParent::none()).is_err());

    let wrong_type = Resource::new(ResourceType::UserResource, tpl, workspace_input(), ResourceParent::none());
    assert!(matches!(wrong_type, Err(ModelError::Validation(_))));

    assert!(template::find("tre-unknown").is_none());
}

#[test]
fn nested_paths_require_matching_parents() {
    let (wid, sid, id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    assert_eq!(
        resource_path(ResourceType::UserResource, &ResourceParent::workspace_service(wid, sid), id).unwrap(),
        format!("/workspaces/{wid}/workspace-services/{sid}/user-resources/{id}")
    );
    assert!(resource_path(ResourceType::WorkspaceService, &ResourceParent::none(), id).is_err());
    assert!(resource_path(ResourceType::Workspace, &ResourceParent::workspace(wid), id).is_err());
}

#[test]
fn patch_merges_and_bumps_version() {
    let tpl = template::find("tre-workspace-base").unwrap();
    let mut ws = Resource::new(ResourceType::Workspace, tpl, workspace_input(), ResourceParent::none()).unwrap();
    let patch = ResourcePatch { is_enabled: None, properties: Some(props(json!({"display_name": "renamed"}))) };
    patch.validate().unwrap();
    ws.apply_patch(&patch);
    ws.apply_patch(&ResourcePatch::disable());
    assert_eq!(ws.display_name(), Some("renamed"));
    assert_eq!(ws.properties["client_id"], "app-id");
    assert!(!ws.is_enabled);
    assert_eq!(ws.resource_version, 2);

    assert!(ResourcePatch::default().validate().is_err());
    let empty_props = ResourcePatch { is_enabled: None, properties: Some(Map::new()) };
    assert!(empty_props.validate().is_err());
}

#[test]
fn operation_lifecycle() {
    let tpl = template::find("tre-workspace-base").unwrap();
    let ws = Resource::new(ResourceType::Workspace, tpl, workspace_input(), ResourceParent::none()).unwrap();
    let mut op = Operation::new(&ws, OperationAction::Uninstall, None);
    assert_eq!(op.status, ResourceStatus::AwaitingDeletion);
    assert_eq!(op.operation_path(), format!("/workspaces/{}/operations/{}", ws.id, op.id));
    assert!(!op.is_terminal());

    op.transition(OperationAction::Uninstall.in_progress_status(), "deleting");
    assert!(!op.is_terminal());
    op.transition(OperationAction::Uninstall.failure_status(), "boom");
    assert!(op.is_terminal());
    assert!(!op.succeeded());

    let v = serde_json::to_value(&op).unwrap();
    assert_eq!(v["status"], "deletion_failed");
    assert_eq!(v["action"], "uninstall");
    assert_eq!(v["resourceId"], json!(ws.id));

    assert_eq!(OperationAction::Upgrade.success_status(), ResourceStatus::Deployed);
}
