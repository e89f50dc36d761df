use indexmap::{IndexMap, IndexSet};

use super::inventory::Inventory;
use super::types::{PipelineDefinition, PipelineKey, ResourceType};

/// Label under which a pool appears in a definition's `resourcepermissions`.
pub const POOL_MERGED: &str = "pool_merged";

/// Pipeline key -> resource type label -> resource ids.
pub type ReverseIndex = IndexMap<PipelineKey, IndexMap<&'static str, IndexSet<String>>>;

/// Inverts resource -> pipeline edges.
///
/// A pool contributes, for each permission of each of its queues, both the pool id
/// (under `pool_merged`) and the queue id. Deployment groups are left out.
pub fn build_reverse_index(inventory: &Inventory) -> ReverseIndex {
    let mut index = ReverseIndex::new();
    let mut record = |key: &PipelineKey, label: &'static str, id: &str| {
        index
            .entry(key.clone())
            .or_default()
            .entry(label)
            .or_default()
            .insert(id.to_string());
    };

    for resource in inventory.iter() {
        match resource.resource_type() {
            ResourceType::DeploymentGroup => {}
            ResourceType::Pool => {
                for queue in resource.queues().unwrap_or_default() {
                    for key in queue.pipelinepermissions.iter() {
                        record(key, POOL_MERGED, &resource.id);
                        record(key, ResourceType::Queue.as_str(), &queue.id);
                    }
                }
            }
            other => {
                for key in resource.pipelinepermissions.iter() {
                    record(key, other.as_str(), &resource.id);
                }
            }
        }
    }
    index
}

/// Writes each definition's slice of the reverse index into its `resourcepermissions`.
pub fn attach_resource_permissions(definitions: &mut [PipelineDefinition], inventory: &Inventory) {
    let index = build_reverse_index(inventory);
    for definition in definitions {
        let Some(entries) = index.get(&definition.k_key) else {
            continue;
        };
        for (label, ids) in entries {
            definition
                .resourcepermissions
                .entry((*label).to_string())
                .or_default()
                .extend(ids.iter().cloned());
        }
    }
}
