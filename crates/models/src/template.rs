//! Built-in template registry.
//!
//! A template names the resource type it deploys and the properties a create
//! request must carry. Anything beyond the required set is accepted as-is.

use serde_json::{Map, Value};

use crate::errors::ModelError;
use crate::resource::ResourceType;

#[derive(Debug, PartialEq)]
pub struct Template {
    pub name: &'static str,
    pub version: &'static str,
    pub resource_type: ResourceType,
    pub required: &'static [&'static str],
}

const ADDRESS_SPACE_SIZES: [&str; 3] = ["small", "medium", "large"];

pub static TEMPLATES: &[Template] = &[
    Template {
        name: "tre-workspace-base",
        version: "0.3.19",
        resource_type: ResourceType::Workspace,
        required: &["display_name", "description", "address_space_size", "client_id"],
    },
    Template {
        name: "tre-service-guacamole",
        version: "0.4.2",
        resource_type: ResourceType::WorkspaceService,
        required: &["display_name", "description"],
    },
    Template {
        name: "tre-service-dev-vm",
        version: "0.1.1",
        resource_type: ResourceType::UserResource,
        required: &["display_name", "description", "os_image"],
    },
];

pub fn find(name: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.name == name)
}

impl Template {
    pub fn validate(&self, resource_type: ResourceType, properties: &Map<String, Value>) -> Result<(), ModelError> {
        if self.resource_type != resource_type {
            return Err(ModelError::validation(format!(
                "template {} deploys {:?}, not {:?}",
                self.name, self.resource_type, resource_type
            )));
        }
        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|k| properties.get(*k).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(ModelError::validation(format!("missing properties: {}", missing.join(", "))));
        }
        if let Some(size) = properties.get("address_space_size") {
            let ok = size.as_str().map_or(false, |s| ADDRESS_SPACE_SIZES.contains(&s));
            if !ok {
                return Err(ModelError::validation("address_space_size must be one of small, medium, large"));
            }
        }
        Ok(())
    }
}
