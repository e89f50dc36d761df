use super::inventory::Inventory;
use super::types::{ProtectedState, Resource, ResourceDetails, ResourceType};

/// A resource is protected when at least one approval or check gates it.
///
/// Pools are never evaluated for checks and always come out unprotected.
pub fn protection_state(resource: &Resource) -> ProtectedState {
    if resource.resource_type() == ResourceType::Pool || resource.checks.is_empty() {
        ProtectedState::Unprotected
    } else {
        ProtectedState::Protected
    }
}

/// Whether pipelines of more than one project can reach the resource. First matching rule wins.
pub fn is_cross_project(resource: &Resource) -> bool {
    if resource.resource_type() == ResourceType::Endpoint {
        return resource.project_references().map_or(0, <[_]>::len) > 1;
    }
    if let Some(queues) = resource.queues() {
        return queues.len() > 1;
    }
    if let Some(references) = resource.project_references() {
        return references.len() > 1;
    }
    resource.pipelinepermissions.project_ids().len() > 1
}

fn classify_resource(resource: &mut Resource) {
    if resource.resource_type() == ResourceType::Pool {
        resource.checks.clear();
    }
    resource.protected_state = protection_state(resource);
    resource.is_cross_project = is_cross_project(resource);
}

/// Sets `protectedState` and `isCrossProject` on every resource.
///
/// Queues folded into a pool are classified as well, so they carry the same
/// flags as their top-level entries.
pub fn classify(inventory: &mut Inventory) {
    for resource in inventory.iter_mut() {
        classify_resource(resource);
        if let ResourceDetails::Pool { queues } = &mut resource.details {
            queues.iter_mut().for_each(classify_resource);
        }
    }
}
