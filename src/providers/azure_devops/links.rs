use url::Url;

use super::types::ResourceType;
use crate::error::{Result, ScanError};

/// Builds links into the Azure DevOps web UI for resources found during a scan.
///
/// `k_url` links use the project name so they read well in reports,
/// `self_attribute` links use the project id so they survive renames.
#[derive(Debug, Clone)]
pub struct WebLinks {
    organization_url: Url,
}

impl WebLinks {
    /// `base` is the web root (e.g. <https://dev.azure.com/>).
    pub fn new(base: &str, organization: &str) -> Result<Self> {
        let mut organization_url = Url::parse(base)
            .map_err(|e| ScanError::Config(format!("Invalid base URL {base}: {e}")))?;
        organization_url
            .path_segments_mut()
            .map_err(|()| ScanError::Config(format!("Base URL {base} cannot hold a path")))?
            .pop_if_empty()
            .push(organization);
        Ok(Self { organization_url })
    }

    pub fn organization(&self) -> String {
        self.organization_url.to_string()
    }

    /// Organization-level agent pool settings page.
    pub fn pool(&self, pool_id: &str) -> String {
        self.link(None, &["_settings", "agentpools"], &[("poolId", pool_id)])
    }

    pub fn pool_agents(&self, pool_id: &str) -> String {
        self.link(
            None,
            &["_settings", "agentpools"],
            &[("poolId", pool_id), ("view", "agents")],
        )
    }

    pub fn queue_agents(&self, project: &str, queue_id: &str) -> String {
        self.link(
            Some(project),
            &["_settings", "agentqueues"],
            &[("queueId", queue_id), ("view", "agents")],
        )
    }

    /// Link to a project-scoped resource. Repositories are addressed by name.
    pub fn resource(&self, resource_type: ResourceType, project: &str, id: &str, name: &str) -> String {
        match resource_type {
            ResourceType::Pool => self.pool(id),
            ResourceType::Queue => {
                self.link(Some(project), &["_settings", "agentqueues"], &[("queueId", id)])
            }
            ResourceType::Endpoint => self.link(
                Some(project),
                &["_settings", "adminservices"],
                &[("resourceId", id)],
            ),
            ResourceType::VariableGroup => self.link(
                Some(project),
                &["_library"],
                &[
                    ("itemType", "VariableGroups"),
                    ("view", "VariableGroupView"),
                    ("variableGroupId", id),
                ],
            ),
            ResourceType::SecureFile => self.link(
                Some(project),
                &["_library"],
                &[
                    ("itemType", "SecureFiles"),
                    ("view", "SecureFileView"),
                    ("secureFileId", id),
                ],
            ),
            ResourceType::Repository => self.link(Some(project), &["_git", name], &[]),
            ResourceType::Environment => self.link(Some(project), &["_environments", id], &[]),
            ResourceType::DeploymentGroup => self.link(
                Some(project),
                &["_machinegroup"],
                &[("view", "MachineGroupView"), ("mgId", id)],
            ),
        }
    }

    fn link(&self, project: Option<&str>, segments: &[&str], query: &[(&str, &str)]) -> String {
        let mut url = self.organization_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(project);
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url.to_string()
    }
}
