use std::collections::HashMap;

use super::types::{PermissionSet, Resource, ResourceDetails};

/// Attaches each pool's queues and sets its permissions to the union of theirs.
///
/// Queues are matched on `pool.id`; pools without queues get an empty list and
/// an empty permission set.
pub fn merge_pools_and_queues<'a>(pools: impl IntoIterator<Item = &'a mut Resource>, queues: &[Resource]) {
    let mut by_pool: HashMap<&str, Vec<&Resource>> = HashMap::new();
    for queue in queues {
        if let ResourceDetails::Queue {
            pool_id: Some(pool_id),
        } = &queue.details
        {
            by_pool.entry(pool_id.as_str()).or_default().push(queue);
        }
    }

    for pool in pools {
        let pool_queues: Vec<Resource> = by_pool
            .get(pool.id.as_str())
            .map(|matched| matched.iter().map(|queue| (*queue).clone()).collect())
            .unwrap_or_default();

        pool.pipelinepermissions = pool_permissions(&pool_queues);
        if let ResourceDetails::Pool { queues } = &mut pool.details {
            *queues = pool_queues;
        }
    }
}

/// Order-preserving, deduplicated union of the queues' permissions.
pub fn pool_permissions(queues: &[Resource]) -> PermissionSet {
    let mut permissions = PermissionSet::new();
    for queue in queues {
        permissions.extend(queue.pipelinepermissions.iter());
    }
    permissions
}
