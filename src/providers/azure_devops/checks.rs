use log::{debug, warn};
use serde_json::Value;

use super::client::{items, AzureDevOpsClient};
use super::inventory::Inventory;
use super::types::{Level, Resource, ResourceType};
use crate::error::Result;

/// Id under which a resource is known to the checks and pipeline-permission APIs.
///
/// Repositories are addressed as `<project id>.<repository id>`.
pub fn api_resource_id(resource: &Resource) -> String {
    match (resource.resource_type(), resource.owning_project_id()) {
        (ResourceType::Repository, Some(project_id)) => format!("{project_id}.{}", resource.id),
        _ => resource.id.clone(),
    }
}

/// Reads the approvals and checks configured on every project-level resource.
///
/// Org-level resources get an empty list. A failed lookup leaves the list empty.
pub async fn attach_checks(client: &AzureDevOpsClient, inventory: &mut Inventory) {
    for resource in inventory.iter_mut() {
        let resource_type = resource.resource_type();
        if resource_type.level() == Level::Org {
            resource.checks.clear();
            continue;
        }
        if !resource_type.supports_checks() {
            continue;
        }
        let Some(project_id) = resource.owning_project_id().map(str::to_string) else {
            continue;
        };

        match fetch_checks(client, &project_id, resource).await {
            Ok(checks) => {
                debug!("{} checks on {resource_type} {}", checks.len(), resource.name);
                resource.checks = checks;
            }
            Err(e) => warn!("Could not read checks of {resource_type} {}: {e}", resource.name),
        }
    }
}

async fn fetch_checks(client: &AzureDevOpsClient, project_id: &str, resource: &Resource) -> Result<Vec<Value>> {
    let resource_id = api_resource_id(resource);
    let url = client.project_url(
        project_id,
        "pipelines/checks/configurations",
        &[
            ("resourceType", resource.resource_type().api_name()),
            ("resourceId", resource_id.as_str()),
            ("$expand", "settings"),
            ("api-version", "7.1-preview.1"),
        ],
    )?;
    Ok(items(client.fetch(&url).await?))
}
